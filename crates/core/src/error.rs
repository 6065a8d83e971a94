//! Capability port errors.

use std::time::Duration;
use thiserror::Error;

/// An error returned by the completion or search port, with a coarse classification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct PortError {
    pub kind: PortErrorKind,
    pub message: String,
}

impl PortError {
    pub fn new(kind: PortErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(PortErrorKind::Network, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(PortErrorKind::Provider, message)
    }

    pub fn empty_response(message: impl Into<String>) -> Self {
        Self::new(PortErrorKind::EmptyResponse, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            PortErrorKind::Timeout,
            format!("no response after {}s", after.as_secs()),
        )
    }
}

/// Error classification, used for logging and for choosing user-facing wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortErrorKind {
    /// Transport failure reaching the collaborator.
    Network,
    /// The collaborator answered with an error status or an unusable payload.
    Provider,
    /// The collaborator answered successfully but with no content.
    EmptyResponse,
    /// The caller-imposed deadline elapsed.
    Timeout,
}

impl std::fmt::Display for PortErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PortErrorKind::Network => "network error",
            PortErrorKind::Provider => "provider error",
            PortErrorKind::EmptyResponse => "empty response",
            PortErrorKind::Timeout => "timed out",
        };
        f.write_str(label)
    }
}
