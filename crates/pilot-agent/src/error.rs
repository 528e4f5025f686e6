//! Error types for pilot-agent

use thiserror::Error;

/// Result type alias using pilot-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during agent operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the LLM provider layer
    #[error("LLM request failed: {0}")]
    Ai(#[from] pilot_ai::Error),

    /// The turn was cancelled by the user. Reported distinctly so the REPL
    /// does not treat it as a failure.
    #[error("operation cancelled")]
    Cancelled,

    /// The turn loop hit its iteration budget
    #[error("agent loop exceeded maximum iterations ({0})")]
    MaxIterationsPerTurn(u32),

    /// A rewind or summarize referenced a turn with no checkpoint
    #[error("invalid checkpoint turn: {0}")]
    InvalidCheckpoint(usize),

    /// Session persistence failure
    #[error("session error: {0}")]
    Session(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error represents a user cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Ai(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
