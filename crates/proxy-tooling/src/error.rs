//! Build-tool errors.

use std::io;
use thiserror::Error;

/// Faults raised by a build-tool backend.
///
/// Every one of these ends up as a `Failure` message on the wire.
#[derive(Debug, Error)]
pub enum ToolingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to start {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("build failed with {}", describe_exit(.exit_code))]
    BuildFailed { exit_code: Option<i32> },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("could not connect to build tool: {0}")]
    Connection(String),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Result type for build-tool operations.
pub type ToolingResult<T> = Result<T, ToolingError>;
