use std::{fmt::Display, future::Future, time::Duration};

/// The number of retries after a failed first attempt.
const RETRIES: usize = 3;

/// The fixed backoff between attempts.
const WAIT: Duration = Duration::from_secs(2);

/// Implemented by error types that can distinguish transient service
/// trouble (HTTP 408, 429, or any 5xx) from real failures.
pub trait Retryable {
    /// Returns true if the operation that produced this error is worth
    /// retrying.
    fn is_transient(&self) -> bool;
}

/// Retries an operation on transient errors.
///
/// The operation is attempted up to four times (one initial attempt plus
/// three retries) with a fixed two second wait between attempts.
/// Non-transient errors propagate immediately.
///
/// # Examples
///
/// ```
/// use stacforge_store::{Error, retry_transient};
///
/// # tokio_test::block_on(async {
/// let value = retry_transient("demonstration", || async { Ok::<_, Error>(42) })
///     .await
///     .unwrap();
/// assert_eq!(value, 42);
/// # })
/// ```
pub async fn retry_transient<T, E, F, Fut>(description: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt <= RETRIES && err.is_transient() => {
                tracing::warn!(attempt, "transient error during {description}: {err}");
                tokio::time::sleep(WAIT).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::retry_transient;
    use crate::{Error, Retryable};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn http(status: u16) -> Error {
        Error::Http {
            status,
            message: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn four_attempts_then_give_up() {
        let statuses = [408, 429, 500, 500, 200];
        let attempts = AtomicUsize::new(0);
        let result: Result<(), _> = retry_transient("listing blobs", || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(http(statuses[attempt])) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_the_envelope() {
        let attempts = AtomicUsize::new(0);
        let value = retry_transient("listing blobs", || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(http(503))
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_do_not_retry() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), _> = retry_transient("listing blobs", || {
            let _ = attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(http(400)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transience() {
        assert!(http(408).is_transient());
        assert!(http(429).is_transient());
        assert!(http(500).is_transient());
        assert!(http(503).is_transient());
        assert!(!http(400).is_transient());
        assert!(!http(403).is_transient());
        assert!(!http(404).is_transient());
        assert!(!Error::ReadOnly("upload").is_transient());
    }
}
