//! Error kinds that map to process exit codes.

use thiserror::Error;

/// Failures the CLI reports with a specific message and exit code.
#[derive(Debug, Error)]
pub enum GridJobError {
    /// Malformed or missing command line arguments.
    #[error("{0}")]
    Usage(String),
    /// A check that must hold before the command can run.
    #[error("Error - {0}")]
    Precondition(String),
    /// An external command failed; its exit code is passed through.
    #[error("{command} exited with code {code}")]
    CommandExit { command: String, code: i32 },
}

impl GridJobError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        GridJobError::Precondition(msg.into())
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            GridJobError::Usage(_) | GridJobError::Precondition(_) => 1,
            // A signal-killed child reports -1; never exit 0 on failure.
            GridJobError::CommandExit { code, .. } if *code > 0 => *code,
            GridJobError::CommandExit { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(GridJobError::Usage("bad".into()).exit_code(), 1);
        assert_eq!(GridJobError::precondition("nope").exit_code(), 1);
        let err = GridJobError::CommandExit {
            command: "condor_rm".into(),
            code: 3,
        };
        assert_eq!(err.exit_code(), 3);
        let err = GridJobError::CommandExit {
            command: "condor_rm".into(),
            code: -1,
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_precondition_message() {
        let err = GridJobError::precondition("start slice is less than zero!");
        assert_eq!(err.to_string(), "Error - start slice is less than zero!");
    }
}
