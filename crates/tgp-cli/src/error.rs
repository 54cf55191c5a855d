//! CLI error types.

use std::process::ExitCode;

use tgp_proto::InfeasibleReason;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Scheduler connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Request timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected or malformed message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The scheduler rejected the request.
    #[error("scheduler error {code}: {message}")]
    Scheduler {
        /// Error code.
        code: u32,
        /// Error message.
        message: String,
    },

    /// The job could not be placed.
    #[error("job {job_id} is infeasible ({reason}): {detail}")]
    Infeasible {
        /// Job id.
        job_id: String,
        /// Reason code.
        reason: InfeasibleReason,
        /// Explanation from the scheduler.
        detail: String,
    },

    /// A node was chosen but the job never reached it.
    #[error("job {job_id} could not be started on {node_id}: {message}")]
    DispatchFailed {
        /// Job id.
        job_id: String,
        /// Chosen node.
        node_id: String,
        /// Delivery error from the scheduler.
        message: String,
    },

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// `1` for transport and local failures, `2` when the scheduler answered
    /// with an error or could not start the job, `3` when the job was
    /// infeasible.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Scheduler { .. } | Self::DispatchFailed { .. } => ExitCode::from(2),
            Self::Infeasible { .. } => ExitCode::from(3),
            _ => ExitCode::FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_connection() {
        let err = CliError::Connection("refused".into());
        assert_eq!(err.to_string(), "connection error: refused");
    }

    #[test]
    fn test_display_infeasible() {
        let err = CliError::Infeasible {
            job_id: "j1".into(),
            reason: InfeasibleReason::OverBudget,
            detail: "every candidate exceeds the budget".into(),
        };
        assert_eq!(
            err.to_string(),
            "job j1 is infeasible (over_budget): every candidate exceeds the budget"
        );
    }

    #[test]
    fn test_exit_codes_distinguish_outcomes() {
        let infeasible = CliError::Infeasible {
            job_id: "j1".into(),
            reason: InfeasibleReason::NoCapacity,
            detail: String::new(),
        };
        let scheduler = CliError::Scheduler {
            code: 1002,
            message: "not found".into(),
        };
        assert_eq!(infeasible.exit_code(), ExitCode::from(3));
        assert_eq!(scheduler.exit_code(), ExitCode::from(2));
        let undelivered = CliError::DispatchFailed {
            job_id: "j1".into(),
            node_id: "vps-1".into(),
            message: "node vps-1 is not connected".into(),
        };
        assert_eq!(undelivered.exit_code(), ExitCode::from(2));
        assert_eq!(CliError::Timeout("x".into()).exit_code(), ExitCode::FAILURE);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert!(matches!(CliError::from(io_err), CliError::Io(_)));
    }
}
