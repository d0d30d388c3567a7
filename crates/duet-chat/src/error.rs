use thiserror::Error;

/// Caller-visible failure taxonomy. duet-api maps these to HTTP statuses,
/// duet-gateway to connection-scoped error events.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Conversation or message does not exist
    #[error("not found")]
    NotFound,

    /// The requesting user's own passkey gate rejected the read
    #[error("invalid or missing pass key")]
    AccessDenied,

    /// Storage or encryption failure; never swallowed
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Run rusqlite work off the async runtime. Join failures surface as
/// storage errors.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ChatError>
where
    F: FnOnce() -> Result<T, ChatError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatError::Storage(anyhow::anyhow!("blocking task join: {}", e)))?
}
