use std::time::Duration;

/// Why a single issued request did not count as a success.
///
/// Both variants are folded into the `failed` counter by the virtual user that
/// observed them. They never escape the user loop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IssueError {
    /// The endpoint could not be reached (connection refused, reset, timeout).
    /// No latency is recorded for these.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered, but not with a success status. The round trip
    /// still counts as a latency observation.
    #[error("endpoint answered with status {status} after {latency:?}")]
    Application { status: u16, latency: Duration },
}

impl IssueError {
    /// Latency worth recording for this failure, if any.
    pub fn latency(&self) -> Option<Duration> {
        match self {
            IssueError::Transport(_) => None,
            IssueError::Application { latency, .. } => Some(*latency),
        }
    }
}

/// Failure to read the external signal for one sampling cycle. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("external signal unavailable: {0}")]
    Unavailable(String),

    #[error("malformed metrics payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A rejected control update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("workload must be a positive duration")]
    NonPositiveWorkload,

    #[error("engine has shut down")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine driver task failed: {0}")]
    Driver(#[from] tokio::task::JoinError),
}
