//! Engine error kinds and their CLI exit-code mapping.
//!
//! Assertion failures are not errors: a step whose assertions fail ends with
//! status `fail` and the structured outcomes in its trace. The kinds below
//! cover everything that stops a step (or the whole run) for another reason.

use thiserror::Error;

/// Errors raised inside the execution engine.
///
/// Each variant corresponds to one error kind of the run model. The kind
/// decides retryability and the process exit code, so executor and CLI both
/// match on it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed placeholder default, invalid regex, capture into a reserved
    /// name, or any other authoring mistake detected at execution time.
    #[error("config error: {0}")]
    Config(String),

    /// Strict mode only: a placeholder without default resolved to nothing.
    #[error("variable '{name}' is not defined in any scope")]
    VariableMissing { name: String },

    /// DNS, TCP, TLS, connection reset. Retryable under the step policy.
    #[error("transport error: {0}")]
    Transport(String),

    /// Per-attempt deadline exceeded. Retryable.
    #[error("attempt exceeded the {limit_ms} ms deadline")]
    Timeout { limit_ms: u64 },

    /// Response body exceeded the configured cap. Not retryable.
    #[error("response body exceeds the {limit} byte limit")]
    BodyTooLarge { limit: usize },

    /// The flow-level abort signal was observed.
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether the step retry policy may re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }

    /// Short hint appended to user-visible failure messages, when one exists.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::VariableMissing { .. } => {
                Some("try --debug-vars to inspect resolved placeholders")
            }
            Self::Timeout { .. } => Some("raise @max-duration or KEST_HTTP_REQUEST_TIMEOUT_MS"),
            Self::BodyTooLarge { .. } => Some("raise KEST_HTTP_MAX_BODY_BYTES if intentional"),
            _ => None,
        }
    }
}

/// Process exit codes for the `kest` CLI.
pub mod exit {
    /// Every executed step passed.
    pub const OK: i32 = 0;
    /// At least one assertion did not pass.
    pub const ASSERTION_FAILURE: i32 = 1;
    /// Transport, timeout, oversized body, cancellation.
    pub const RUNTIME_ERROR: i32 = 2;
    /// Configuration or usage problem, including strict-mode missing vars.
    pub const CONFIG_ERROR: i32 = 3;
}
