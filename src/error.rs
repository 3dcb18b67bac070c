//! Typed error taxonomy for the engine.
//!
//! Tool-execution failures are converted to tool-result strings inside
//! the agent loop; everything else propagates as an [`EngineError`].
//! "Not found" is not an error here — lookups signal it with
//! `bool`/`Option` returns.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed caller input: bad arguments, unsupported file types,
    /// out-of-range offsets.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A path resolved outside the workspace root. Always fails closed.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// An upstream provider (embedding or chat model) failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The model requested a tool that does not exist.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_convert() {
        fn read_missing() -> Result<Vec<u8>> {
            Ok(std::fs::read("/nonexistent/docchat-error-test")?)
        }
        assert!(matches!(read_missing().unwrap_err(), EngineError::Io(_)));
    }

    #[test]
    fn test_display_includes_detail() {
        let err = EngineError::AccessDenied("path '../x' parent-directory traversal".to_string());
        assert!(err.to_string().contains("access denied"));
        assert!(err.to_string().contains("../x"));
    }
}
