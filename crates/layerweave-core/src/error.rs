//! Error handling for layerweave
//!
//! Every failure the engine can report is fatal. Unrecognized G-code is
//! never an error; it passes through.
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for layerweave
#[derive(Error, Debug)]
pub enum Error {
    /// A numeric word on a move line could not be parsed
    #[error("Malformed record at line {line_number}: {reason} (`{line}`)")]
    MalformedRecord {
        /// 1-based line number in the input stream.
        line_number: usize,
        /// The offending line, verbatim.
        line: String,
        /// What could not be parsed.
        reason: String,
    },

    /// Relative positioning or relative extrusion is active for a move
    #[error("Unsupported mode at line {line_number}: {mode} is active")]
    ModeUnsupported {
        /// 1-based line number of the move that needed absolute coordinates.
        line_number: usize,
        /// The mode command responsible, e.g. `G91` or `M83`.
        mode: String,
    },

    /// The input contains no detectable layer boundary
    #[error("No layers found: input has no layer-change markers and no Z rise before extrusion")]
    NoLayersFound,

    /// A configuration value is out of range
    #[error("Invalid configuration '{field}': {reason}")]
    InvalidConfiguration {
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Standard I/O error at the file boundary
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a malformed-record error for a line
    pub fn malformed(line_number: usize, line: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            line_number,
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-configuration error for a field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Line number the error refers to, if any
    pub fn line_number(&self) -> Option<usize> {
        match self {
            Error::MalformedRecord { line_number, .. }
            | Error::ModeUnsupported { line_number, .. } => Some(*line_number),
            _ => None,
        }
    }

    /// Check if this error was caused by the input stream rather than configuration
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedRecord { .. } | Error::ModeUnsupported { .. } | Error::NoLayersFound
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_record_display() {
        let err = Error::malformed(12, "G1 Xabc Y2", "invalid X value 'abc'");
        assert_eq!(
            err.to_string(),
            "Malformed record at line 12: invalid X value 'abc' (`G1 Xabc Y2`)"
        );
        assert_eq!(err.line_number(), Some(12));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_mode_unsupported_display() {
        let err = Error::ModeUnsupported {
            line_number: 3,
            mode: "M83".to_string(),
        };
        assert_eq!(err.to_string(), "Unsupported mode at line 3: M83 is active");
    }

    #[test]
    fn test_invalid_configuration_display() {
        let err = Error::invalid_config("max_step_size", "must be > 0");
        assert_eq!(
            err.to_string(),
            "Invalid configuration 'max_step_size': must be > 0"
        );
        assert_eq!(err.line_number(), None);
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.gcode");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
