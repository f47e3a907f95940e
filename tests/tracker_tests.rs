//! ActionTracker 行为测试
//!
//! 覆盖阈值刷新、立即刷新、定时刷新、失败重试顺序、身份优先级、
//! 销毁语义与 TrackerContext 重新初始化。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tokio::sync::Notify;
use tokio::time::Duration;

use placetrack::analytics::{
    ActionRecord, ActionSink, ActionTracker, ActionType, TrackerContext, TrackerOptions,
};
use placetrack::identity::{
    AnonymousResolver, ClaimsDecoder, IdentityResolver, MemoryCredentialStore, StaticResolver,
    StoredCredentialResolver,
};

// =============================================================================
// 测试辅助
// =============================================================================

struct RecordingSink {
    batches: std::sync::Mutex<Vec<Vec<ActionRecord>>>,
    fail: AtomicBool,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: std::sync::Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn batches(&self) -> Vec<Vec<ActionRecord>> {
        self.batches.lock().unwrap().clone()
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn send_batch(&self, actions: Vec<ActionRecord>) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("503 Service Unavailable");
        }
        self.batches.lock().unwrap().push(actions);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Recording"
    }
}

/// 在 send_batch 中停住，直到测试放行，然后返回失败
struct GatedFailingSink {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ActionSink for GatedFailingSink {
    async fn send_batch(&self, _actions: Vec<ActionRecord>) -> anyhow::Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        anyhow::bail!("connection reset")
    }

    fn name(&self) -> &'static str {
        "GatedFailing"
    }
}

fn options(buffer_size: usize, flush_interval: Duration) -> TrackerOptions {
    TrackerOptions {
        buffer_size,
        flush_interval,
        ..TrackerOptions::default()
    }
}

fn start(sink: &Arc<RecordingSink>, buffer_size: usize) -> ActionTracker {
    ActionTracker::start(
        options(buffer_size, Duration::from_secs(30)),
        Arc::clone(sink) as Arc<dyn ActionSink>,
        Arc::new(AnonymousResolver),
    )
}

/// 让出执行权，直到条件满足或放弃
async fn settle_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if cond() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    cond()
}

fn place_ids(records: &[ActionRecord]) -> Vec<String> {
    records.iter().map(|r| r.place_id.clone()).collect()
}

fn unsigned_token(payload: &str) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
        URL_SAFE_NO_PAD.encode(payload)
    )
}

// =============================================================================
// 刷新触发
// =============================================================================

#[cfg(test)]
mod flush_trigger_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clicks_below_threshold_wait_for_timer() {
        let sink = RecordingSink::new();
        let tracker = start(&sink, 10);

        for i in 0..9 {
            tracker.track_click(format!("museum_{}", i), None);
        }
        assert!(!settle_until(|| sink.batch_count() > 0).await);
        assert_eq!(tracker.pending_len(), 9);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(settle_until(|| sink.batch_count() == 1).await);
        assert_eq!(sink.batches()[0].len(), 9);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_triggers_single_batch() {
        let sink = RecordingSink::new();
        let tracker = start(&sink, 2);

        tracker.track_click("a_1", None);
        assert!(!settle_until(|| sink.batch_count() > 0).await);

        tracker.track_click("b_2", None);
        assert!(settle_until(|| sink.batch_count() == 1).await);

        let batch = &sink.batches()[0];
        let categories: Vec<&str> = batch.iter().map(|r| r.place_category.as_str()).collect();
        assert_eq!(categories, vec!["a", "b"]);
        assert!(batch.iter().all(|r| r.action_type == ActionType::Click));
    }

    #[tokio::test(start_paused = true)]
    async fn test_like_and_bookmark_flush_immediately() {
        let sink = RecordingSink::new();
        let tracker = start(&sink, 10);

        tracker.track_like("cafe_1", true, None);
        assert!(settle_until(|| sink.batch_count() == 1).await);
        assert_eq!(place_ids(&sink.batches()[0]), vec!["cafe_1"]);

        tracker.track_click("park_2", None);
        tracker.track_bookmark("hotel_3", true, None);
        assert!(settle_until(|| sink.batch_count() == 2).await);
        assert_eq!(place_ids(&sink.batches()[1]), vec!["park_2", "hotel_3"]);
        assert_eq!(sink.batches()[1][1].action_value, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_disables_timer() {
        let sink = RecordingSink::new();
        let tracker = ActionTracker::start(
            options(10, Duration::ZERO),
            Arc::clone(&sink) as Arc<dyn ActionSink>,
            Arc::new(AnonymousResolver),
        );

        tracker.track_click("a_1", None);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!settle_until(|| sink.batch_count() > 0).await);

        tracker.flush().await;
        assert_eq!(sink.batch_count(), 1);
    }
}

// =============================================================================
// 失败与重试
// =============================================================================

#[cfg(test)]
mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_flush_sends_everything_in_order() {
        let sink = RecordingSink::new();
        let tracker = start(&sink, 100);

        let ids: Vec<String> = (0..25).map(|i| format!("spot_{}", i)).collect();
        for id in &ids {
            tracker.track_click(id.clone(), None);
        }
        tracker.flush().await;

        assert_eq!(tracker.pending_len(), 0);
        assert_eq!(sink.batch_count(), 1);
        assert_eq!(place_ids(&sink.batches()[0]), ids);
    }

    #[tokio::test]
    async fn test_failed_batch_goes_back_ahead_of_new_records() {
        let sink = Arc::new(GatedFailingSink {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let tracker = Arc::new(ActionTracker::start(
            options(100, Duration::from_secs(3600)),
            Arc::clone(&sink) as Arc<dyn ActionSink>,
            Arc::new(AnonymousResolver),
        ));

        tracker.track_click("a_1", None);
        tracker.track_click("b_2", None);

        let tr = Arc::clone(&tracker);
        let in_flight = tokio::spawn(async move { tr.flush().await });
        sink.entered.notified().await;

        // 在途批次已经离开缓冲区，新记录落入空缓冲区
        tracker.track_click("c_3", None);
        assert_eq!(place_ids(&tracker.pending_actions()), vec!["c_3"]);

        sink.release.notify_one();
        in_flight.await.unwrap();

        assert_eq!(
            place_ids(&tracker.pending_actions()),
            vec!["a_1", "b_2", "c_3"]
        );
    }

    #[tokio::test]
    async fn test_repeated_failures_keep_accumulating() {
        let sink = RecordingSink::new();
        sink.fail.store(true, Ordering::SeqCst);
        let tracker = start(&sink, 1000);

        for round in 0..3 {
            tracker.track_click(format!("r{}_1", round), None);
            tracker.flush().await;
        }
        assert_eq!(
            place_ids(&tracker.pending_actions()),
            vec!["r0_1", "r1_1", "r2_1"]
        );

        sink.fail.store(false, Ordering::SeqCst);
        tracker.flush().await;
        assert_eq!(sink.batches()[0].len(), 3);
        assert_eq!(tracker.pending_len(), 0);
    }
}

// =============================================================================
// 身份解析
// =============================================================================

#[cfg(test)]
mod identity_tests {
    use super::*;

    fn stored_resolver(store: Arc<MemoryCredentialStore>) -> Arc<dyn IdentityResolver> {
        Arc::new(StoredCredentialResolver::new(
            store,
            ClaimsDecoder::unverified(),
            "access_token",
            "user_id",
        ))
    }

    #[tokio::test]
    async fn test_explicit_id_beats_stored_credential() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.set("access_token", unsigned_token(r#"{"sub":"stored-user"}"#));

        let sink = RecordingSink::new();
        let tracker = ActionTracker::start(
            options(100, Duration::from_secs(3600)),
            Arc::clone(&sink) as Arc<dyn ActionSink>,
            stored_resolver(Arc::clone(&store)),
        );

        tracker.track_click("a_1", None);
        tracker.set_current_user_id(Some("u1".to_string()));
        tracker.track_click("b_2", None);

        let users: Vec<Option<String>> = tracker
            .pending_actions()
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(
            users,
            vec![Some("stored-user".to_string()), Some("u1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_static_resolver_until_explicit_override() {
        let sink = RecordingSink::new();
        let tracker = ActionTracker::start(
            options(100, Duration::from_secs(3600)),
            Arc::clone(&sink) as Arc<dyn ActionSink>,
            Arc::new(StaticResolver("fixed".into())),
        );

        tracker.track_click("a_1", None);
        tracker.track_like("b_2", true, None);
        tracker.set_current_user_id(Some("u1".to_string()));
        tracker.track_click("c_3", None);
        tracker.set_current_user_id(None);
        tracker.track_click("d_4", None);
        tracker.flush().await;

        let users: Vec<Option<String>> = sink
            .batches()
            .concat()
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(
            users,
            vec![
                Some("fixed".to_string()),
                Some("fixed".to_string()),
                Some("u1".to_string()),
                Some("fixed".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_logout_falls_back_to_anonymous() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.set("user_id", "plain-user");

        let sink = RecordingSink::new();
        let tracker = ActionTracker::start(
            options(100, Duration::from_secs(3600)),
            Arc::clone(&sink) as Arc<dyn ActionSink>,
            stored_resolver(Arc::clone(&store)),
        );

        tracker.track_click("a_1", None);
        store.clear();
        tracker.track_click("b_2", None);

        let records = tracker.pending_actions();
        assert_eq!(records[0].user_id.as_deref(), Some("plain-user"));
        assert_eq!(records[1].user_id, None);
    }
}

// =============================================================================
// 生命周期
// =============================================================================

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_destroy_flushes_and_stops_delivery() {
        let sink = RecordingSink::new();
        let tracker = start(&sink, 10);

        tracker.track_click("a_1", None);
        tracker.destroy().await;
        assert_eq!(sink.batch_count(), 1);

        tracker.track_click("b_2", None);
        tracker.track_like("c_3", true, None);
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!settle_until(|| sink.batch_count() > 1).await);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_session_id_stable_across_records() {
        let sink = RecordingSink::new();
        let tracker = start(&sink, 100);

        tracker.track_click("a_1", None);
        tracker.track_like("b_2", false, None);
        tracker.flush().await;

        let sessions: Vec<String> = sink
            .batches()
            .concat()
            .into_iter()
            .map(|r| r.session_id)
            .collect();
        assert!(!sessions.is_empty());
        assert!(sessions.iter().all(|s| s == tracker.session_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_reinitialize_stops_previous_timer() {
        let sink = RecordingSink::new();
        let factory_sink = Arc::clone(&sink);
        let context = TrackerContext::with_sink_factory(Arc::new(AnonymousResolver), move |_| {
            Arc::clone(&factory_sink) as Arc<dyn ActionSink>
        });

        let first = context.initialize_with(options(10, Duration::from_secs(30)));
        first.track_click("old_1", None);

        let second = context.initialize_with(options(10, Duration::from_secs(30)));
        assert_ne!(first.session_id(), second.session_id());

        // 旧实例在后台做最后一次投递
        assert!(settle_until(|| sink.batch_count() == 1).await);
        assert!(!first.is_active());

        second.track_click("new_1", None);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(settle_until(|| sink.batch_count() == 2).await);
        assert_eq!(place_ids(&sink.batches()[1]), vec!["new_1"]);

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(!settle_until(|| sink.batch_count() > 2).await);

        context.destroy().await;
        assert!(context.current().is_none());
    }
}
