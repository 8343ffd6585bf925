//! Error types for the reactive core.
//!
//! Every fallible operation in the crate returns [`ReactiveError`]. The one
//! exception is [`AsyncSettlementError`], which travels inside a
//! [`Pending`](crate::reactive::Pending) value and is only ever seen by
//! whoever awaits that value. The engine listens for settlement but never
//! interprets the payload.

use thiserror::Error;

/// Boxed error returned by effect bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors raised by the reactive engine.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A reactive write happened while a computation's own tracked pass was
    /// executing. The write is rejected and the previous value is kept.
    #[error("cannot mutate `{key}` while effect `{effect}` is running")]
    MutationDuringComputation { key: String, effect: String },

    /// The body of a computation returned an error.
    #[error("effect `{effect}` failed: {source}")]
    ComputationBody {
        effect: String,
        #[source]
        source: BoxError,
    },

    /// Nested notifications went deeper than the configured limit.
    #[error("update depth exceeded the limit of {limit} nested notifications")]
    UpdateDepthExceeded { limit: usize },

    /// A memo was read while it was computing its own value.
    #[error("memo `{memo}` was read while computing itself")]
    CircularMemo { memo: String },

    /// A body returned a pending value but no local executor could take the
    /// settlement continuation. The computation is left idle, not suspended.
    #[error(
        "effect `{effect}` returned a pending value outside a local executor; \
         run it inside a tokio LocalSet or install one with `Runtime::set_spawner`"
    )]
    NoLocalExecutor { effect: String },

    /// A value that should have been a keyed record was something else.
    #[error("reactive targets must be keyed records, found {found}")]
    NotARecord { found: &'static str },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// The runtime configuration could not be loaded.
    #[error("invalid runtime configuration: {0}")]
    Config(String),
}

impl ReactiveError {
    /// Whether this error was produced by a computation body.
    pub fn is_body_error(&self) -> bool {
        matches!(self, Self::ComputationBody { .. })
    }
}

/// Rejection payload of a [`Pending`](crate::reactive::Pending) value.
///
/// Pending values are shared between the engine and any number of external
/// observers, so the rejection is carried as a rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pending value rejected: {message}")]
pub struct AsyncSettlementError {
    message: String,
}

impl AsyncSettlementError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
