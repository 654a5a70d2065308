//! Periodic sweep that deletes sessions without members.
//!
//! Leaving members already delete an emptied session immediately; the
//! reaper catches anything left behind. Sessions whose members are all idle
//! are reported but never evicted while they still have members.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::SessionRegistry;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub idle: Vec<String>,
}

/// Run one sweep over the registry.
pub async fn sweep(registry: &SessionRegistry, idle_threshold: Duration) -> SweepReport {
    let removed = registry.remove_empty().await;
    let idle = registry.idle_sessions(idle_threshold).await;

    if removed > 0 {
        log::info!("Reaper removed {removed} empty session(s)");
    }
    if !idle.is_empty() {
        log::debug!("Reaper: {} session(s) idle past {idle_threshold:?}: {idle:?}", idle.len());
    }
    SweepReport { removed, idle }
}

/// Handle to the background sweep task. Dropping it stops the task.
pub struct Reaper {
    handle: JoinHandle<()>,
}

impl Reaper {
    /// Sweep every `interval`, first sweep one interval after spawning.
    /// A zero interval is raised to one millisecond.
    pub fn spawn(registry: Arc<SessionRegistry>, interval: Duration, idle_threshold: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep(&registry, idle_threshold).await;
            }
        });
        log::debug!("Reaper started, interval {interval:?}");
        Self { handle }
    }

    /// Stop sweeping. Idempotent.
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{DeliveryCounters, Outbox};
    use crate::protocol::JoinRequest;
    use crate::registry::SessionConfig;
    use uuid::Uuid;

    fn outbox() -> (Outbox, tokio::sync::mpsc::Receiver<crate::broadcast::Frame>) {
        Outbox::channel(Uuid::new_v4(), 16, Arc::new(DeliveryCounters::default()))
    }

    #[tokio::test]
    async fn test_sweep_keeps_populated_sessions() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let (alice, _rx) = outbox();
        registry.join("doc1", &alice, JoinRequest::new("d", "Alice")).await;

        let report = sweep(&registry, Duration::from_secs(300)).await;
        assert_eq!(report.removed, 0);
        assert!(report.idle.is_empty());
        assert!(registry.contains("doc1").await);
    }

    #[tokio::test]
    async fn test_sweep_reports_idle_without_evicting() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let (alice, _rx) = outbox();
        registry.join("doc1", &alice, JoinRequest::new("d", "Alice")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = sweep(&registry, Duration::from_millis(1)).await;
        assert_eq!(report.idle, vec!["doc1".to_string()]);
        assert_eq!(report.removed, 0);
        assert_eq!(registry.users("doc1").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_session_gone_within_one_interval() {
        let registry = Arc::new(SessionRegistry::new(SessionConfig::default()));
        registry.open("doc1", "d", serde_json::json!({})).await;
        let _reaper = Reaper::spawn(registry.clone(), Duration::from_secs(60), Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(registry.contains("doc1").await);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!registry.contains("doc1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_sweeps() {
        let registry = Arc::new(SessionRegistry::new(SessionConfig::default()));
        registry.open("doc1", "d", serde_json::json!({})).await;
        let reaper = Reaper::spawn(registry.clone(), Duration::ZERO, Duration::from_secs(300));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(reaper.is_running());
        assert!(!registry.contains("doc1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_stops_on_request() {
        let registry = Arc::new(SessionRegistry::new(SessionConfig::default()));
        let reaper = Reaper::spawn(registry, Duration::from_secs(60), Duration::from_secs(300));
        assert!(reaper.is_running());

        reaper.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!reaper.is_running());
        reaper.stop();
    }
}
