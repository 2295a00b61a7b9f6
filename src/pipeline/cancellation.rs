use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Longest uninterrupted sleep slice while waiting on a cancellable delay
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Shared one-way shutdown signal
///
/// Created once by the runtime and cloned into every long-running task.
/// Once requested it stays requested.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            log::info!("🛑 Cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Sleep for `duration`, waking early if `cancel` is requested
///
/// Returns `true` if the full duration elapsed, `false` if cancelled.
pub async fn sleep_unless_cancelled(cancel: &CancellationFlag, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;

    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        sleep((deadline - now).min(SLEEP_SLICE)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_shared_and_sticky() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());

        flag.request_cancel();
        flag.request_cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_sleep_completes_without_cancel() {
        let flag = CancellationFlag::new();
        assert!(sleep_unless_cancelled(&flag, Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_sleep_wakes_early_on_cancel() {
        let flag = CancellationFlag::new();
        let trigger = flag.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trigger.request_cancel();
        });

        let started = Instant::now();
        let completed = sleep_unless_cancelled(&flag, Duration::from_secs(30)).await;

        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
