//! Unified error handling for slirc-sentry.
//!
//! Cross-cutting error types shared by the engine and the command
//! dispatcher. The wire-visible reply text for a failed command is the
//! error's `Display` output; the dispatcher appends usage lines for
//! `Usage` errors and logs the code label.

use crate::db::DbError;
use crate::mask::MaskError;
use thiserror::Error;

/// Errors that can occur while executing an operator command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Bad invocation; the reply carries this message plus the command's
    /// usage lines. Nothing was mutated.
    #[error("{0}")]
    Usage(String),

    /// Mask source failed to compile. Nothing was mutated.
    #[error(transparent)]
    Compile(#[from] MaskError),

    /// The referenced mask id is not in the catalog.
    #[error("unknown mask id {0}")]
    NotFound(i64),

    /// A retype to the mask's current type; no change record is written.
    #[error("{0}")]
    AlreadyType(String),

    /// Durable write failed; in-memory caches were not touched past the
    /// failed write.
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

impl CommandError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Usage(_) => "usage",
            Self::Compile(_) => "compile",
            Self::NotFound(_) => "not_found",
            Self::AlreadyType(_) => "already_type",
            Self::Db(_) => "db",
        }
    }
}

/// Result type for command handlers: reply lines, or an error the
/// dispatcher renders.
pub type CommandResult = Result<Vec<String>, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_codes() {
        assert_eq!(CommandError::Usage("x".into()).error_code(), "usage");
        assert_eq!(CommandError::NotFound(3).error_code(), "not_found");
        assert_eq!(
            CommandError::AlreadyType("y".into()).error_code(),
            "already_type"
        );
    }

    #[test]
    fn reply_texts() {
        assert_eq!(
            CommandError::NotFound(7).to_string(),
            "unknown mask id 7"
        );
        assert_eq!(
            CommandError::AlreadyType("/x/ is already WARN".into()).to_string(),
            "/x/ is already WARN"
        );
        // Compile is transparent: the mask error's own text is the reply
        let err = CommandError::from(MaskError::Unterminated);
        assert_eq!(err.to_string(), "unterminated mask");
    }
}
