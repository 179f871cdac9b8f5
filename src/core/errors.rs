/*!
 * Error Types
 * Centralized error handling with thiserror
 */

use crate::communicate::CommunicateResult;
use thiserror::Error;

/// Subprocess operation result
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by launch configuration, spawning and lifecycle control.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid launch configuration, detected before the child exists.
    #[error("invalid launch configuration: {context}")]
    Config {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The OS refused to create the process.
    #[error("failed to spawn process: {context}")]
    Spawn {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Failure after a successful launch (wait, signal, state query).
    #[error("process runtime failure: {context}")]
    Runtime {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Failure reading or writing an open stream.
    #[error("stream I/O error")]
    Stream(#[from] std::io::Error),

    /// Non-zero exit code, raised by [`CommunicateResult::check`].
    #[error("process exited abnormally with code {}", .0.exit_code)]
    AbnormalExit(CommunicateResult),
}

impl Error {
    pub(crate) fn config(context: impl Into<String>) -> Self {
        Error::Config {
            context: context.into(),
            source: None,
        }
    }

    pub(crate) fn config_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Config {
            context: context.into(),
            source: Some(source),
        }
    }

    pub(crate) fn spawn(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Spawn {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn runtime(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Runtime {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_context() {
        let err = Error::config("argv must not be empty");
        assert_eq!(
            err.to_string(),
            "invalid launch configuration: argv must not be empty"
        );
    }

    #[test]
    fn stream_error_wraps_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = Error::from(io);
        assert!(matches!(err, Error::Stream(_)));
    }
}
