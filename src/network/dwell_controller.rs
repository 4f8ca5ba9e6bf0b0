//! Dwell-time (tarpit) policy.
//!
//! Once a handler's conversation ends, the socket of a holdable protocol stays open until the
//! connection has lived at least the configured minimum.

use log::debug;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DwellController {
    minimum: Duration,
}

impl DwellController {
    pub fn new(minimum: Duration) -> Self {
        Self { minimum }
    }

    pub fn minimum(&self) -> Duration {
        self.minimum
    }

    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.minimum.saturating_sub(elapsed)
    }

    /// Sleeps until `minimum` has elapsed since `started`.
    ///
    /// Returns `false` when the hold was cut short by a shutdown request.
    pub async fn hold(&self, started: Instant, shutdown: &mut watch::Receiver<bool>) -> bool {
        let remaining = self.remaining(started.elapsed());
        if remaining.is_zero() {
            return true;
        }
        debug!("holding connection for {:?}", remaining);
        tokio::select! {
            _ = tokio::time::sleep(remaining) => true,
            _ = wait_for_shutdown(shutdown) => false,
        }
    }
}

/// Resolves once shutdown has been requested. Never resolves if the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining() {
        let dwell = DwellController::new(Duration::from_secs(120));
        assert_eq!(dwell.remaining(Duration::from_secs(20)), Duration::from_secs(100));
        assert_eq!(dwell.remaining(Duration::from_secs(500)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_reaches_minimum() {
        let (_tx, mut rx) = watch::channel(false);
        let dwell = DwellController::new(Duration::from_secs(120));
        let started = Instant::now();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(dwell.hold(started, &mut rx).await);
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_interrupted_by_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let dwell = DwellController::new(Duration::from_secs(120));
        let started = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            let _ = tx.send(true);
            // keep the sender alive past the hold
            tokio::time::sleep(Duration::from_secs(600)).await;
        });

        assert!(!dwell.hold(started, &mut rx).await);
        assert!(started.elapsed() < Duration::from_secs(120));
    }
}
