use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_millis(250);

/// Whether an error message looks like a transient connection failure
/// worth retrying. Anything else fails on the first attempt.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("dns")
}

/// Run `op` up to `DEFAULT_MAX_ATTEMPTS` times, retrying only transient
/// connection errors with linear backoff between attempts.
pub async fn with_retries<T, E, F, Fut>(label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < DEFAULT_MAX_ATTEMPTS && is_transient(&err.to_string()) => {
                warn!(%label, attempt, error = %err, "transient failure, retrying");
                sleep(BACKOFF_STEP * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
