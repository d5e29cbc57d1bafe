pub mod python;
pub mod submit;

use crate::tools::ToolSet;
use std::fmt;

/// Variables supplied by the driving loop, merged into the namespace before
/// a fragment runs. Values are opaque to the sandbox.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Outcome of one execution turn. Exactly one kind per call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The fragment ran without printing anything and without submitting.
    NoOutput,
    /// Captured output, or a formatted diagnostic when the fragment failed.
    Output(String),
    /// A value explicitly submitted as the final answer for this session.
    Final(serde_json::Value),
}

impl Outcome {
    pub fn is_final(&self) -> bool {
        matches!(self, Outcome::Final(_))
    }
}

#[derive(Debug)]
pub enum InterpreterError {
    SpawnFailed(String),
    ChildExited(String),
    Protocol(String),
    Io(String),
}

impl fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpreterError::SpawnFailed(msg) => {
                write!(f, "Failed to spawn interpreter: {}", msg)
            }
            InterpreterError::ChildExited(msg) => {
                write!(f, "Interpreter process exited: {}", msg)
            }
            InterpreterError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            InterpreterError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for InterpreterError {}

impl From<std::io::Error> for InterpreterError {
    fn from(e: std::io::Error) -> Self {
        InterpreterError::Io(e.to_string())
    }
}

/// The execution sandbox an agent loop drives, one `execute` call per turn.
///
/// A session is `start`ed, executed against repeatedly while its namespace
/// accumulates state, and `shutdown` when the task ends. Executing against a
/// session that was never started (or was shut down) starts it implicitly.
/// Code-level failures never surface as errors here; they come back as
/// [`Outcome::Output`] diagnostics the loop can read and react to.
pub trait Interpreter {
    fn start(&mut self) -> Result<(), InterpreterError>;
    fn execute(
        &mut self,
        code: &str,
        variables: Option<&Variables>,
    ) -> Result<Outcome, InterpreterError>;
    fn shutdown(&mut self);
    fn tools(&self) -> &ToolSet;
    fn set_tools(&mut self, tools: ToolSet);
}
