//! Script error types
//!
//! Every failure raised while executing a script is a [`ScriptError`].
//! Operators return them unchanged up through macro execution; only the
//! scheduler turns them into counted outcomes.
//!
//! Loop signals (break/continue) are NOT errors. They travel in the `Ok`
//! side of `Result<Flow, ScriptError>` (see [`crate::stack::Flow`]).

use crate::context::ContextError;

/// Coarse classification of a [`ScriptError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong value kind or shape for an operator
    Type,
    /// Out-of-range sequence or byte-sequence index
    Index,
    /// A loop exceeded its wall-clock budget
    Timeout,
    /// Anything else raised during execution, including collaborator failures
    Execution,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Execution => "ExecutionFailure",
        };
        f.write_str(name)
    }
}

/// Error raised while reading or executing a script
#[derive(Debug)]
pub enum ScriptError {
    /// `op` received a value of the wrong kind; `message` completes the sentence
    Type { op: String, message: String },
    /// `op` indexed a sequence of length `len` at `index`
    Index { op: String, index: i64, len: usize },
    /// `op` ran longer than `budget_ms`
    Timeout { op: String, budget_ms: i64 },
    /// `op` needed more values than the stack holds
    Underflow { op: String },
    /// No operator registered under this name
    UnknownOperator(String),
    /// No binding under this name
    UnboundSymbol(String),
    /// A break or continue signal reached the top level of a script
    SignalEscaped(&'static str),
    /// An execution budget (operations, depth) was exhausted
    LimitExceeded(String),
    /// Script text could not be read
    Read { line: usize, message: String },
    /// I/O failure (script body, collaborators)
    Io(std::io::Error),
    /// Stack context could not be encoded or decoded
    Context(ContextError),
    /// Any other failure raised by an operator or collaborator
    Failed(String),
}

impl ScriptError {
    /// Build a type error for `op`
    pub fn type_error(op: &str, message: impl Into<String>) -> Self {
        ScriptError::Type {
            op: op.to_string(),
            message: message.into(),
        }
    }

    /// Build a generic execution failure
    pub fn failed(message: impl Into<String>) -> Self {
        ScriptError::Failed(message.into())
    }

    /// Map onto the language-level taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScriptError::Type { .. } => ErrorKind::Type,
            ScriptError::Index { .. } => ErrorKind::Index,
            ScriptError::Timeout { .. } => ErrorKind::Timeout,
            _ => ErrorKind::Execution,
        }
    }

    /// Name of the operator that raised the error, when known
    pub fn operator(&self) -> Option<&str> {
        match self {
            ScriptError::Type { op, .. }
            | ScriptError::Index { op, .. }
            | ScriptError::Timeout { op, .. }
            | ScriptError::Underflow { op } => Some(op),
            ScriptError::UnknownOperator(name) => Some(name),
            ScriptError::SignalEscaped(name) => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::Type { op, message } => write!(f, "{} {}", op, message),
            ScriptError::Index { op, index, len } => write!(
                f,
                "{} index {} is out of bounds for length {}.",
                op, index, len
            ),
            ScriptError::Timeout { op, budget_ms } => {
                write!(f, "{} executed for too long (> {} ms).", op, budget_ms)
            }
            ScriptError::Underflow { op } => write!(f, "{} stack underflow.", op),
            ScriptError::UnknownOperator(name) => write!(f, "Unknown function '{}'.", name),
            ScriptError::UnboundSymbol(name) => write!(f, "Unknown symbol '{}'.", name),
            ScriptError::SignalEscaped(name) => {
                write!(f, "{} used outside of a loop.", name)
            }
            ScriptError::LimitExceeded(msg) => write!(f, "{}", msg),
            ScriptError::Read { line, message } => write!(f, "line {}: {}", line, message),
            ScriptError::Io(e) => write!(f, "I/O error: {}", e),
            ScriptError::Context(e) => write!(f, "Stack context error: {}", e),
            ScriptError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScriptError::Io(e) => Some(e),
            ScriptError::Context(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ScriptError {
    fn from(e: std::io::Error) -> Self {
        ScriptError::Io(e)
    }
}

impl From<ContextError> for ScriptError {
    fn from(e: ContextError) -> Self {
        ScriptError::Context(e)
    }
}
