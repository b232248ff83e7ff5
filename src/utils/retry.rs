use log::{debug, info, warn};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

/// Retry an async operation with exponential backoff. Only errors accepted by
/// `retryable` are retried; anything else surfaces immediately. The store has
/// read-after-write latency, so a mutation can race the creation of its own
/// parent and succeed a moment later.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.base_delay;

    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt == config.max_attempts {
                    warn!("Operation failed after {} attempts: {}", config.max_attempts, e);
                    return Err(e);
                }

                if retryable(&e) {
                    debug!("Attempt {} failed transiently, retrying in {:?}: {}", attempt, delay, e);
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(
                        Duration::from_millis(
                            (delay.as_millis() as f64 * config.backoff_multiplier) as u64,
                        ),
                        config.max_delay,
                    );
                } else {
                    debug!("Attempt {} failed with non-retryable error: {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    unreachable!()
}
