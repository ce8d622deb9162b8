//! CLI subcommands.

pub mod doctor;
