pub mod admin;
pub mod auth;
pub mod comments;
pub mod error;
pub mod friendships;
pub mod likes;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod profiles;

mod views;

use error::ApiError;

/// Run blocking rusqlite work off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("background task failed"))
    })?
}
