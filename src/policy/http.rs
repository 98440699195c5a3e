//! HTTP sending with bounded retries for transient failures.

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retries after the first attempt; the delay doubles from one second.
const MAX_RETRIES: usize = 3;
const BASE_DELAY: Duration = Duration::from_secs(1);
/// Jitter is up to a quarter of the base delay.
const JITTER_DIVISOR: u128 = 4;

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body()
}

/// Delay before retry number `attempt + 1`.
fn backoff(attempt: usize) -> Duration {
    let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
    let base = BASE_DELAY.saturating_mul(factor);
    let max_jitter_ms = (base.as_millis() / JITTER_DIVISOR).min(u128::from(u64::MAX)) as u64;
    if max_jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
}

/// Send the request built by `make_request`, retrying timeouts, connection
/// errors and transient status codes. Any other response is returned as is,
/// including non-success statuses, for the caller to interpret.
pub(super) async fn send_with_retry(
    mut make_request: impl FnMut() -> reqwest::RequestBuilder,
) -> Result<reqwest::Response> {
    let mut attempt = 0;
    loop {
        let can_retry = attempt < MAX_RETRIES;
        match make_request().send().await {
            Ok(response) if can_retry && is_transient_status(response.status()) => {
                let delay = backoff(attempt);
                warn!(
                    "Policy endpoint returned {}; retry {}/{} in {:?}",
                    response.status(),
                    attempt + 1,
                    MAX_RETRIES,
                    delay
                );
                let _ = response.bytes().await;
                sleep(delay).await;
            }
            Ok(response) => return Ok(response),
            Err(err) if can_retry && is_transient_error(&err) => {
                let delay = backoff(attempt);
                debug!(
                    "Policy request error: {}; retry {}/{} in {:?}",
                    err,
                    attempt + 1,
                    MAX_RETRIES,
                    delay
                );
                sleep(delay).await;
            }
            Err(err) => {
                return Err(anyhow::Error::new(err))
                    .with_context(|| format!("request failed after {} attempt(s)", attempt + 1));
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_with_bounded_jitter() {
        for attempt in 0..3 {
            let base = BASE_DELAY * (1 << attempt);
            let delay = backoff(attempt);
            assert!(delay >= base);
            assert!(delay <= base + base / 4);
        }
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }
}
