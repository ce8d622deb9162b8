//! Error types for the diagnostic engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while running an external program.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The program could not be started at all.
    #[error("failed to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran but exited unsuccessfully.
    ///
    /// Whatever was written to stdout before the exit is kept, several
    /// checks still inspect it.
    #[error("`{program}` exited with {}", describe_code(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        stdout: String,
    },

    /// Reading from or waiting on the child failed.
    #[error("I/O error while running `{program}`")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A background process exited before it reported readiness.
    #[error("`{program}` exited before becoming ready")]
    NotReady { program: String },
}

impl ExecError {
    /// Stdout captured before the failure, empty when nothing was captured.
    #[must_use]
    pub fn captured_stdout(&self) -> &str {
        match self {
            Self::Exit { stdout, .. } => stdout,
            _ => "",
        }
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "signal".to_string(),
    }
}

/// Errors raised by the cluster API adapter.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The Kubernetes API call failed.
    #[error("Kubernetes API error")]
    Kube(#[from] kube::Error),

    /// A kubeconfig could not be loaded.
    #[error("failed to load kubeconfig from {path}: {message}")]
    Kubeconfig { path: PathBuf, message: String },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised while loading the doctor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for [`crate::config::DoctorConfig`].
    #[error("invalid config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors raised by the scheduler.
#[derive(Debug, Error)]
pub enum DoctorError {
    /// Two checks with the same name were handed to one pool.
    #[error("check `{0}` was selected more than once")]
    DuplicateCheck(String),
}
