use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use groundwork_common::RetryPolicy;

/// Run `op` under `policy`, retrying timeouts only. Backoff grows
/// exponentially per the policy, with 0-500ms of jitter on top.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_timeout() && attempt + 1 < policy.max_attempts => {
                let backoff = policy.backoff(attempt);
                let jitter = Duration::from_millis(rand::rng().random_range(0..500));
                warn!(
                    label,
                    attempt = attempt + 1,
                    backoff_secs = backoff.as_secs(),
                    "Timed out, retrying after backoff"
                );
                tokio::time::sleep(backoff + jitter).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
