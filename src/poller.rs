use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::events::{emit_event, EventReceiver, EventSender, PollEvent};
use crate::filter::{new_high_severity, unread_count};
use crate::service::ApiService;
use crate::types::notification::Notification;

type SharedList = Arc<Mutex<Vec<Notification>>>;

/// Background notification refresh. Fetches once immediately, then once per
/// interval. A tick never waits for the previous fetch, so responses can
/// land out of order; the last one to resolve wins.
pub struct NotificationPoller {
    notifications: SharedList,
    schedule: JoinHandle<()>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
    stopped: Arc<AtomicBool>,
}

impl NotificationPoller {
    pub fn start(service: Arc<ApiService>, interval: Duration) -> (Self, EventReceiver) {
        Self::start_with(interval, move || {
            let service = Arc::clone(&service);
            async move { service.fetch_notifications().await }.boxed()
        })
    }

    /// Poll `service` every `config.poll_interval`.
    pub fn from_config(service: Arc<ApiService>, config: &ApiConfig) -> (Self, EventReceiver) {
        Self::start(service, config.poll_interval)
    }

    /// Poll with an arbitrary fetch. `None` from a fetch leaves the list as is.
    pub fn start_with<F>(interval: Duration, fetch: F) -> (Self, EventReceiver)
    where
        F: Fn() -> BoxFuture<'static, Option<Vec<Notification>>> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifications: SharedList = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let schedule = tokio::spawn({
            let notifications = Arc::clone(&notifications);
            let in_flight = Arc::clone(&in_flight);
            let stopped = Arc::clone(&stopped);
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    debug!("Notification poll dispatched");
                    let handle = tokio::spawn(resolve(
                        fetch(),
                        Arc::clone(&notifications),
                        Arc::clone(&stopped),
                        tx.clone(),
                    ));
                    // stop() flips the flag under this lock, so a handle is
                    // either drained by it or aborted here.
                    let mut pending = in_flight.lock().unwrap_or_else(|e| e.into_inner());
                    if stopped.load(Ordering::SeqCst) {
                        handle.abort();
                        return;
                    }
                    pending.retain(|h: &JoinHandle<()>| !h.is_finished());
                    pending.push(handle);
                }
            }
        });

        info!(interval_ms = interval.as_millis() as u64, "Notification poller started");
        (
            Self {
                notifications,
                schedule,
                in_flight,
                stopped,
            },
            rx,
        )
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn unread_count(&self) -> usize {
        unread_count(&self.notifications.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && !self.schedule.is_finished()
    }

    /// Cancel the schedule and every fetch still in flight. Nothing touches
    /// the list once this returns.
    pub fn stop(&self) {
        let mut pending = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.schedule.abort();
        for handle in pending.drain(..) {
            handle.abort();
        }
        info!("Notification poller stopped");
    }
}

impl Drop for NotificationPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn resolve(
    poll: BoxFuture<'static, Option<Vec<Notification>>>,
    shared: SharedList,
    stopped: Arc<AtomicBool>,
    tx: EventSender,
) {
    let Some(current) = poll.await else {
        debug!("Notification poll failed, keeping previous list");
        return;
    };

    let (unread, fresh) = {
        let mut list = shared.lock().unwrap_or_else(|e| e.into_inner());
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        let fresh: Vec<Notification> = new_high_severity(&list, &current)
            .into_iter()
            .cloned()
            .collect();
        *list = current;
        (unread_count(&list), fresh)
    };

    if let Err(e) = emit_event(&tx, PollEvent::Updated { unread }) {
        debug!(error = %e, "Poll event dropped");
    }
    for notification in fresh {
        if let Err(e) = emit_event(&tx, PollEvent::HighSeverity(notification)) {
            debug!(error = %e, "Poll event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::FeedbackStore;
    use crate::source::mock::MockLatency;
    use crate::source::MockSource;
    use crate::storage::tests::test_storage;
    use std::sync::atomic::AtomicUsize;

    fn notification(id: &str, severity: &str, read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            anomaly_id: format!("A{}", id),
            title: format!("Notification {}", id),
            message: String::new(),
            severity: severity.to_string(),
            read,
            created_at: "2024-06-15T11:00:00.000Z".to_string(),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_immediately_then_on_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (poller, _rx) = NotificationPoller::start_with(Duration::from_secs(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Some(vec![]) }.boxed()
        });

        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn emits_unread_and_high_severity_once() {
        let (poller, mut rx) = NotificationPoller::start_with(Duration::from_secs(30), || {
            async {
                Some(vec![
                    notification("1", "high", false),
                    notification("2", "medium", true),
                ])
            }
            .boxed()
        });

        assert_eq!(rx.recv().await, Some(PollEvent::Updated { unread: 1 }));
        match rx.recv().await {
            Some(PollEvent::HighSeverity(n)) => assert_eq!(n.id, "1"),
            other => panic!("unexpected event {:?}", other),
        }

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.recv().await, Some(PollEvent::Updated { unread: 1 }));
        settle().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(poller.unread_count(), 1);
        assert_eq!(poller.notifications().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_polls_last_resolved_wins() {
        // First poll is slow, second is fast: the slow one resolves last.
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (poller, _rx) = NotificationPoller::start_with(Duration::from_secs(30), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(45)).await;
                    Some(vec![notification("old", "low", false)])
                } else {
                    Some(vec![notification("new", "low", false)])
                }
            }
            .boxed()
        });

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(poller.notifications()[0].id, "new");

        tokio::time::sleep(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(poller.notifications()[0].id, "old");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_keeps_previous_list() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (poller, _rx) = NotificationPoller::start_with(Duration::from_secs(30), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { (n == 0).then(|| vec![notification("1", "low", false)]) }.boxed()
        });

        settle().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(poller.notifications().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_schedule_and_in_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (poller, mut rx) = NotificationPoller::start_with(Duration::from_secs(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Some(vec![notification("1", "high", false)])
            }
            .boxed()
        });

        settle().await;
        poller.stop();
        settle().await;
        assert!(!poller.is_running());

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(poller.notifications().is_empty());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_freezes_list_on_worker_threads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (poller, mut rx) = NotificationPoller::start_with(Duration::from_millis(1), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(3)).await;
                Some(vec![notification(&n.to_string(), "low", false)])
            }
            .boxed()
        });

        tokio::time::sleep(Duration::from_millis(25)).await;
        poller.stop();
        assert!(!poller.is_running());
        let frozen = poller.notifications();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(poller.notifications(), frozen);
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "event channel still open after stop");
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (poller, _rx) = NotificationPoller::start_with(Duration::from_secs(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Some(vec![]) }.boxed()
        });
        settle().await;
        drop(poller);

        tokio::time::sleep(Duration::from_secs(300)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn from_config_uses_poll_interval() {
        let (_dir, storage) = test_storage();
        let service = Arc::new(ApiService::new(
            Arc::new(MockSource::new().unwrap().with_latency(MockLatency::none())),
            FeedbackStore::new(storage),
            std::env::temp_dir(),
        ));
        let config = ApiConfig {
            poll_interval: Duration::from_secs(5),
            ..ApiConfig::default()
        };

        let (_poller, mut rx) = NotificationPoller::from_config(service, &config);
        assert_eq!(rx.recv().await, Some(PollEvent::Updated { unread: 2 }));
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, PollEvent::HighSeverity(_)));
        }

        tokio::time::sleep(Duration::from_secs(4)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.recv().await, Some(PollEvent::Updated { unread: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_the_service() {
        let (_dir, storage) = test_storage();
        let source = MockSource::new().unwrap().with_latency(MockLatency::default());
        let service = Arc::new(ApiService::new(
            Arc::new(source),
            FeedbackStore::new(storage),
            std::env::temp_dir(),
        ));

        let (poller, mut rx) = NotificationPoller::start(Arc::clone(&service), Duration::from_secs(30));
        assert_eq!(rx.recv().await, Some(PollEvent::Updated { unread: 2 }));
        assert_eq!(poller.notifications().len(), 3);
        assert!(!service.is_loading("notifications"));
    }
}
