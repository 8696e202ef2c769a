use thiserror::Error;

/// Errors surfaced by the engine's fallible public APIs.
///
/// Background-path failures (presence re-track after a status change,
/// durable persistence) are logged and swallowed rather than returned;
/// see the module docs on `engine`.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("presence entry failed: {0}")]
    Entry(String),

    #[error("status store error: {0}")]
    Store(String),

    #[error("engine is shutting down")]
    ShuttingDown,
}
