//! Check outcomes and evidence accumulation.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// What kind of problem a [`Cause`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseKind {
    /// A subprocess, API or HTTP call could not start or complete.
    Execution,
    /// The call completed but its output shows a fault.
    Evidence,
    /// The check does not apply to this host.
    Precondition,
    /// The check itself crashed.
    Internal,
}

impl fmt::Display for CauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution => write!(f, "execution"),
            Self::Evidence => write!(f, "evidence"),
            Self::Precondition => write!(f, "precondition"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// One independent piece of evidence of a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cause {
    pub kind: CauseKind,
    pub message: String,
    /// Rendered error chain of the failure that produced this cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Cause {
    pub fn new(kind: CauseKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// A failed call, keeping the error and everything it wraps.
    pub fn execution(message: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            kind: CauseKind::Execution,
            message: message.into(),
            source: Some(render_chain(err)),
        }
    }

    pub fn evidence(message: impl Into<String>) -> Self {
        Self::new(CauseKind::Evidence, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(CauseKind::Precondition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CauseKind::Internal, message)
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => write!(f, "{}", self.message),
        }
    }
}

fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut next = err.source();
    while let Some(inner) = next {
        rendered.push_str(": ");
        rendered.push_str(&inner.to_string());
        next = inner.source();
    }
    rendered
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "causes", rename_all = "snake_case")]
pub enum CheckOutcome {
    Healthy,
    Unhealthy(Vec<Cause>),
}

impl CheckOutcome {
    /// Shorthand for an outcome with exactly one cause.
    #[must_use]
    pub fn failed(cause: Cause) -> Self {
        Self::Unhealthy(vec![cause])
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Causes in discovery order, empty when healthy.
    #[must_use]
    pub fn causes(&self) -> &[Cause] {
        match self {
            Self::Healthy => &[],
            Self::Unhealthy(causes) => causes,
        }
    }
}

/// Collects causes for a single check run.
///
/// Adding never blocks on anything but the internal lock, and causes keep the
/// order in which they were added.
#[derive(Debug, Default)]
pub struct EvidenceAggregator {
    causes: Mutex<Vec<Cause>>,
}

impl EvidenceAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, cause: Cause) {
        self.causes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cause);
    }

    pub fn execution(&self, message: impl Into<String>, err: &(dyn std::error::Error + 'static)) {
        self.add(Cause::execution(message, err));
    }

    pub fn evidence(&self, message: impl Into<String>) {
        self.add(Cause::evidence(message));
    }

    pub fn precondition(&self, message: impl Into<String>) {
        self.add(Cause::precondition(message));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.causes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold everything added so far into an outcome.
    #[must_use]
    pub fn finish(self) -> CheckOutcome {
        let causes = self
            .causes
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        if causes.is_empty() {
            CheckOutcome::Healthy
        } else {
            CheckOutcome::Unhealthy(causes)
        }
    }
}
