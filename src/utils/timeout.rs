//! Async timeout helpers.

use crate::error::{MiioError, Result};
use std::future::Future;
use std::time::Duration;

/// Default receive timeout for one request/response exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on how long `close()` waits for the worker to wind down
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a fallible future under a deadline, mapping expiry to `MiioError::Timeout`
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(MiioError::Timeout),
    }
}
