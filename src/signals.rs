/// Signal handling for graceful shutdown.
///
/// SIGINT (Ctrl-C) and SIGTERM request a stop. The loop finishes the
/// conversion in flight, dispatches nothing further, and exits. A running
/// conversion is never interrupted.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared shutdown flag with wakeup for sleepers.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns true if this was the first request.
    pub fn request(&self) -> bool {
        let first = !self.inner.requested.swap(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        first
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early if shutdown is requested.
    /// Returns true if woken by shutdown.
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_requested() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_requested(),
            _ = notified => true,
        }
    }
}

/// Spawn a task that turns SIGINT/SIGTERM into shutdown requests.
pub fn install(shutdown: Shutdown) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            };
            if shutdown.request() {
                tracing::info!(
                    signal = name,
                    "shutdown requested; finishing current conversion before exit"
                );
            } else {
                tracing::warn!(
                    signal = name,
                    "already shutting down; waiting for current conversion to finish"
                );
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_request_reports_first_only() {
        let s = Shutdown::new();
        assert!(!s.is_requested());
        assert!(s.request());
        assert!(!s.request());
        assert!(s.is_requested());
    }

    #[test]
    fn test_clones_share_state() {
        let s = Shutdown::new();
        let other = s.clone();
        other.request();
        assert!(s.is_requested());
    }

    #[tokio::test]
    async fn test_sleep_runs_full_duration_without_request() {
        let s = Shutdown::new();
        let start = Instant::now();
        assert!(!s.sleep(Duration::from_millis(50)).await);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_sleep_returns_immediately_when_already_requested() {
        let s = Shutdown::new();
        s.request();
        let start = Instant::now();
        assert!(s.sleep(Duration::from_secs(30)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_wakes_on_request() {
        let s = Shutdown::new();
        let waker = s.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waker.request();
        });
        let start = Instant::now();
        assert!(s.sleep(Duration::from_secs(30)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
