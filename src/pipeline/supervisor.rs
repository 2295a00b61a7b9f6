//! Fail-fast supervision for long-running tasks
//!
//! A task is retried with exponential backoff up to a fixed number of
//! attempts. Exhaustion produces a `FatalError`; what happens next (process
//! exit, or just logging) is up to the `FatalHandler`. Cancellation during a
//! backoff ends supervision without another attempt.

use super::cancellation::{sleep_unless_cancelled, CancellationFlag};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub stop_attempt_count: u32,
    /// Seconds; the wait after failed attempt `n` is `multiplier * 2^(n-1)`
    pub multiplier: f64,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            stop_attempt_count: 3,
            multiplier: 1.0,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the 1-based `attempt` failed
    pub fn wait_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.multiplier * 2f64.powi(exponent);

        let raw = if secs.is_finite() && secs > 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(self.max_wait)
        } else if secs.is_finite() {
            Duration::ZERO
        } else {
            self.max_wait
        };

        raw.max(self.min_wait).min(self.max_wait)
    }
}

/// A supervised task ran out of attempts
#[derive(Debug)]
pub struct FatalError {
    pub task: String,
    pub attempts: u32,
    pub source: Box<dyn Error + Send + Sync>,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task '{}' failed after {} attempt(s): {}",
            self.task, self.attempts, self.source
        )
    }
}

impl Error for FatalError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Run `task` until it succeeds or the policy's attempts are used up
///
/// `task` is a factory so each attempt starts from a fresh future. Returns
/// `Ok(None)` when `cancel` is requested while waiting out a backoff.
pub async fn supervise<T, E, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationFlag,
    mut task: F,
) -> Result<Option<T>, FatalError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + Send + Sync + 'static,
{
    let max_attempts = policy.stop_attempt_count.max(1);
    let mut attempt = 1;

    loop {
        match task().await {
            Ok(value) => {
                if attempt > 1 {
                    log::info!("✅ Task '{}' recovered on attempt {}", name, attempt);
                }
                return Ok(Some(value));
            }
            Err(e) if attempt >= max_attempts => {
                log::error!(
                    "❌ Task '{}' failed on final attempt {}/{}: {}",
                    name,
                    attempt,
                    max_attempts,
                    e
                );
                return Err(FatalError {
                    task: name.to_string(),
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                let wait = policy.wait_for(attempt);
                log::warn!(
                    "⏳ Task '{}' failed (attempt {}/{}): {} - retrying in {:?}",
                    name,
                    attempt,
                    max_attempts,
                    e,
                    wait
                );
                if !sleep_unless_cancelled(cancel, wait).await {
                    log::info!("🛑 Task '{}' cancelled during backoff, not retrying", name);
                    return Ok(None);
                }
                attempt += 1;
            }
        }
    }
}

/// Reaction to a supervised task exhausting its retries
pub trait FatalHandler: Send + Sync {
    fn on_fatal(&self, error: &FatalError);
}

/// Terminate the whole process so an external supervisor restarts it
#[derive(Debug, Clone, Copy)]
pub struct ExitProcess {
    pub exit_code: i32,
}

impl Default for ExitProcess {
    fn default() -> Self {
        Self { exit_code: 1 }
    }
}

impl FatalHandler for ExitProcess {
    fn on_fatal(&self, error: &FatalError) {
        log::error!("💀 {} - terminating process (exit code {})", error, self.exit_code);
        std::process::exit(self.exit_code);
    }
}

/// Log the failure and let the caller carry on
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndContinue;

impl FatalHandler for LogAndContinue {
    fn on_fatal(&self, error: &FatalError) {
        log::error!("💀 {}", error);
    }
}

/// `supervise`, then hand any `FatalError` to `handler`
pub async fn run_supervised<T, E, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationFlag,
    handler: &dyn FatalHandler,
    task: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + Send + Sync + 'static,
{
    match supervise(name, policy, cancel, task).await {
        Ok(value) => value,
        Err(fatal) => {
            handler.on_fatal(&fatal);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct Flaky;

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky failure")
        }
    }

    impl Error for Flaky {}

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            stop_attempt_count: 3,
            multiplier: 0.001,
            min_wait: Duration::from_millis(1),
            max_wait: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_default_wait_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.wait_for(1), Duration::from_secs(1));
        assert_eq!(policy.wait_for(2), Duration::from_secs(2));
        assert_eq!(policy.wait_for(3), Duration::from_secs(4));
        assert_eq!(policy.wait_for(5), Duration::from_secs(10));
        assert_eq!(policy.wait_for(200), Duration::from_secs(10));
    }

    #[test]
    fn test_wait_clamped_to_min() {
        let policy = RetryPolicy {
            multiplier: 0.1,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.wait_for(1), Duration::from_secs(1));

        let nan = RetryPolicy {
            multiplier: f64::NAN,
            ..RetryPolicy::default()
        };
        assert_eq!(nan.wait_for(1), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = supervise("flaky", &fast_policy(), &CancellationFlag::new(), || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Flaky)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_fatal() {
        let calls = Arc::new(AtomicU32::new(0));

        let cancel = CancellationFlag::new();
        let result: Result<Option<()>, FatalError> =
            supervise("doomed", &fast_policy(), &cancel, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky)
                }
            })
            .await;

        let fatal = result.unwrap_err();
        assert_eq!(fatal.task, "doomed");
        assert_eq!(fatal.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(fatal.to_string().contains("flaky failure"));
    }

    struct Recording(Mutex<Vec<String>>);

    impl FatalHandler for Recording {
        fn on_fatal(&self, error: &FatalError) {
            self.0.lock().unwrap().push(error.task.clone());
        }
    }

    #[tokio::test]
    async fn test_run_supervised_invokes_handler_once() {
        let handler = Recording(Mutex::new(Vec::new()));
        let cancel = CancellationFlag::new();

        let outcome: Option<()> =
            run_supervised("doomed", &fast_policy(), &cancel, &handler, || async { Err(Flaky) })
                .await;
        assert!(outcome.is_none());

        let ok = run_supervised("fine", &fast_policy(), &cancel, &handler, || async {
            Ok::<_, Flaky>(7)
        })
        .await;
        assert_eq!(ok, Some(7));

        assert_eq!(*handler.0.lock().unwrap(), vec!["doomed".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationFlag::new();
        let handler = Recording(Mutex::new(Vec::new()));
        let slow = RetryPolicy {
            min_wait: Duration::from_secs(30),
            max_wait: Duration::from_secs(30),
            ..RetryPolicy::default()
        };

        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.request_cancel();
            });
        }

        let started = tokio::time::Instant::now();
        let outcome: Option<()> = run_supervised("backing-off", &slow, &cancel, &handler, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky)
            }
        })
        .await;

        assert!(outcome.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Cancellation is not a fatal failure
        assert!(handler.0.lock().unwrap().is_empty());
    }
}
