use std::future::Future;
use std::time::Duration;

use crate::error::{AiError, AiResult};

/// Backoff schedule between completion attempts, in seconds.
pub const BACKOFF_SECONDS: [u64; 5] = [5, 10, 20, 30, 30];

/// Maximum completion attempts per request.
pub const MAX_ATTEMPTS: usize = 5;

/// Run `op` up to [`MAX_ATTEMPTS`] times, sleeping the backoff schedule
/// between transient failures. Fatal errors propagate immediately.
pub async fn with_retry<T, F, Fut>(label: &str, mut op: F) -> AiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AiResult<T>>,
{
    let mut last_err: Option<AiError> = None;
    for attempt in 0..MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let wait = Duration::from_secs(BACKOFF_SECONDS[attempt]);
                tracing::warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {}s",
                    label,
                    attempt + 1,
                    MAX_ATTEMPTS,
                    e,
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(AiError::EmptyCompletion))
}
