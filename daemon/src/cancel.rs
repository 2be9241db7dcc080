/// One-way stop token shared between the lifecycle controller and the sensor loops.
///
/// Blocking sensor threads poll [`RunState::is_running`]; async tasks await
/// [`RunState::stopped`].  The token only ever moves from running to stopped.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct RunState {
    stopped: Arc<AtomicBool>,
    notify: Arc<watch::Sender<bool>>,
}

impl RunState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(tx),
        }
    }

    /// Marks the token stopped.  Returns `true` only for the call that performed
    /// the transition; every later call is a no-op returning `false`.
    pub fn stop(&self) -> bool {
        let first = self
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            self.notify.send_replace(true);
        }
        first
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once the token has been stopped (immediately if it already is).
    pub async fn stopped(&self) {
        let mut rx = self.notify.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_running() {
        assert!(RunState::new().is_running());
    }

    #[test]
    fn stop_is_visible_through_clones() {
        let token = RunState::new();
        let seen_by_sensor = token.clone();
        token.stop();
        assert!(!seen_by_sensor.is_running());
    }

    #[test]
    fn only_first_stop_reports_the_transition() {
        let token = RunState::new();
        assert!(token.stop());
        assert!(!token.stop());
        assert!(!token.clone().stop());
        assert!(!token.is_running());
    }

    #[tokio::test]
    async fn stopped_resolves_after_stop_from_another_thread() {
        let token = RunState::new();
        let remote = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.stop();
        });
        tokio::time::timeout(Duration::from_secs(2), token.stopped())
            .await
            .expect("stopped() should resolve");
    }

    #[tokio::test]
    async fn stopped_resolves_immediately_when_already_stopped() {
        let token = RunState::new();
        token.stop();
        tokio::time::timeout(Duration::from_millis(100), token.stopped())
            .await
            .expect("already-stopped token should resolve at once");
    }
}
