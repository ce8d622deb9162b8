//! In-memory fakes for the process and cluster seams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cluster::{ClusterClient, ClusterSelector, IngressSummary, PodSummary};
use crate::error::{ClusterError, ExecError};
use crate::process::{CommandInvocation, CommandOutput, ProcessGuard, ProcessRunner};

/// Scripted reply for one command line.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Exit { code: i32, stdout: String },
    SpawnFailure,
}

/// [`ProcessRunner`] answering from a script keyed by `program args...`.
///
/// Unscripted commands succeed with empty output.
#[derive(Debug, Default)]
pub struct FakeRunner {
    replies: Mutex<HashMap<String, Reply>>,
    programs: Mutex<Vec<String>>,
    calls: Mutex<Vec<CommandInvocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(self, program: &str) -> Self {
        self.programs.lock().unwrap().push(program.to_string());
        self
    }

    pub fn reply(self, command_line: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(command_line.to_string(), reply);
        self
    }

    pub fn ok(self, command_line: &str, stdout: &str) -> Self {
        self.reply(command_line, Reply::Ok(stdout.to_string()))
    }

    pub fn calls(&self) -> Vec<CommandInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandInvocation::display).collect()
    }

    fn answer(&self, invocation: &CommandInvocation) -> Result<String, ExecError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&invocation.display())
            .cloned()
            .unwrap_or(Reply::Ok(String::new()));

        match reply {
            Reply::Ok(stdout) => Ok(stdout),
            Reply::Exit { code, stdout } => Err(ExecError::Exit {
                program: invocation.program.clone(),
                code: Some(code),
                stdout,
            }),
            Reply::SpawnFailure => Err(ExecError::Spawn {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, ExecError> {
        self.answer(invocation).map(|stdout| CommandOutput { stdout })
    }

    async fn scan_lines(
        &self,
        invocation: &CommandInvocation,
        visit: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), ExecError> {
        match self.answer(invocation) {
            Ok(stdout) => {
                stdout.lines().for_each(|line| visit(line));
                Ok(())
            }
            Err(err) => {
                err.captured_stdout().lines().for_each(|line| visit(line));
                Err(err)
            }
        }
    }

    async fn spawn(&self, invocation: &CommandInvocation) -> Result<ProcessGuard, ExecError> {
        self.answer(invocation).map(|_| ProcessGuard::detached())
    }

    fn program_exists(&self, program: &str) -> bool {
        self.programs.lock().unwrap().iter().any(|p| p == program)
    }
}

/// [`ClusterClient`] returning fixed resources.
#[derive(Debug, Default)]
pub struct FakeCluster {
    pub pods: Vec<PodSummary>,
    pub ingresses: Vec<IngressSummary>,
    pub fail: bool,
    pub selectors: Arc<Mutex<Vec<ClusterSelector>>>,
}

impl FakeCluster {
    pub fn with_pods(names: &[&str]) -> Self {
        Self {
            pods: names
                .iter()
                .map(|name| PodSummary {
                    name: (*name).to_string(),
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn record(&self, selector: &ClusterSelector) -> Result<(), ClusterError> {
        self.selectors.lock().unwrap().push(selector.clone());
        if self.fail {
            Err(ClusterError::Other("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_pods(&self, selector: &ClusterSelector) -> Result<Vec<PodSummary>, ClusterError> {
        self.record(selector)?;
        Ok(self.pods.clone())
    }

    async fn list_ingresses(
        &self,
        selector: &ClusterSelector,
    ) -> Result<Vec<IngressSummary>, ClusterError> {
        self.record(selector)?;
        Ok(self.ingresses.clone())
    }
}
