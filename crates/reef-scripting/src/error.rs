//! Script execution error types

use rhai::EvalAltResult;
use std::fmt;

/// Script execution result type
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Token returned from the progress callback when the bound deadline passes
pub(crate) const DEADLINE_TOKEN: &str = "deadline";

/// Token returned from the progress callback when the caller cancelled
pub(crate) const CANCELLED_TOKEN: &str = "cancelled";

/// Script execution error
#[derive(Debug, Clone)]
pub enum ScriptError {
    /// Script compilation/parsing error
    CompilationError {
        /// Error message
        message: String,
        /// Line number if available
        line: Option<usize>,
        /// Column number if available
        column: Option<usize>,
    },

    /// Script runtime error (includes capability misuse raised inside the script)
    RuntimeError {
        /// Error message
        message: String,
        /// Script line where error occurred
        line: Option<usize>,
    },

    /// Execution overran the bound deadline
    Timeout,

    /// The caller cancelled the execution
    Cancelled,

    /// Invalid script source
    InvalidSource {
        /// Error message
        message: String,
    },

    /// No handler registered under the given key
    HandlerNotFound {
        /// Handler key
        key: String,
    },

    /// Type conversion error
    TypeError {
        /// Error message
        message: String,
    },

    /// IO error (reading script files)
    IoError {
        /// Error message
        message: String,
    },
}

impl ScriptError {
    /// Create a compilation error
    pub fn compilation<S: Into<String>>(message: S) -> Self {
        Self::CompilationError {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::RuntimeError {
            message: message.into(),
            line: None,
        }
    }

    /// Create an invalid source error
    pub fn invalid_source<S: Into<String>>(message: S) -> Self {
        Self::InvalidSource {
            message: message.into(),
        }
    }

    /// Create a type error
    pub fn type_error<S: Into<String>>(message: S) -> Self {
        Self::TypeError {
            message: message.into(),
        }
    }

    /// Whether the error came from the cooperative deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompilationError {
                message,
                line,
                column,
            } => {
                write!(f, "Script compilation error: {}", message)?;
                if let Some(line) = line {
                    write!(f, " at line {}", line)?;
                    if let Some(col) = column {
                        write!(f, ", column {}", col)?;
                    }
                }
                Ok(())
            }
            Self::RuntimeError { message, line } => {
                write!(f, "Script runtime error: {}", message)?;
                if let Some(line) = line {
                    write!(f, " at line {}", line)?;
                }
                Ok(())
            }
            Self::Timeout => write!(f, "Script execution deadline exceeded"),
            Self::Cancelled => write!(f, "Script execution cancelled"),
            Self::InvalidSource { message } => {
                write!(f, "Invalid script source: {}", message)
            }
            Self::HandlerNotFound { key } => {
                write!(f, "No handler registered under key '{}'", key)
            }
            Self::TypeError { message } => {
                write!(f, "Script type error: {}", message)
            }
            Self::IoError { message } => {
                write!(f, "Script IO error: {}", message)
            }
        }
    }
}

impl std::error::Error for ScriptError {}

impl From<std::io::Error> for ScriptError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
        }
    }
}

impl From<rhai::ParseError> for ScriptError {
    fn from(err: rhai::ParseError) -> Self {
        let pos = err.position();
        Self::CompilationError {
            message: err.err_type().to_string(),
            line: pos.line(),
            column: pos.position(),
        }
    }
}

impl From<Box<EvalAltResult>> for ScriptError {
    fn from(err: Box<EvalAltResult>) -> Self {
        let mut inner = err.as_ref();
        loop {
            match inner {
                EvalAltResult::ErrorInFunctionCall(_, _, cause, _)
                | EvalAltResult::ErrorInModule(_, cause, _) => inner = cause.as_ref(),
                EvalAltResult::ErrorTerminated(token, _) => {
                    return match token.clone().into_immutable_string() {
                        Ok(s) if s.as_str() == CANCELLED_TOKEN => Self::Cancelled,
                        _ => Self::Timeout,
                    };
                }
                _ => break,
            }
        }

        let pos = err.position();
        Self::RuntimeError {
            message: err.to_string(),
            line: if pos.is_none() { None } else { pos.line() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::{Dynamic, Position};

    #[test]
    fn test_terminated_maps_to_timeout() {
        let err = Box::new(EvalAltResult::ErrorTerminated(
            Dynamic::from(DEADLINE_TOKEN),
            Position::NONE,
        ));
        assert!(ScriptError::from(err).is_timeout());
    }

    #[test]
    fn test_terminated_cancel_token() {
        let err = Box::new(EvalAltResult::ErrorTerminated(
            Dynamic::from(CANCELLED_TOKEN),
            Position::NONE,
        ));
        assert!(matches!(ScriptError::from(err), ScriptError::Cancelled));
    }

    #[test]
    fn test_display() {
        let err = ScriptError::HandlerNotFound {
            key: "hook:3".to_string(),
        };
        assert_eq!(err.to_string(), "No handler registered under key 'hook:3'");
    }
}
