//! 追踪器上下文
//!
//! 由宿主（页面 / 进程）持有，显式初始化与销毁，替代进程级全局单例。

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, trace};

use super::manager::{ActionTracker, TrackerOptions, TrackerOverrides};
use super::sink::{ActionSink, HttpCollectorSink};
use super::TrackRequest;
use crate::identity::IdentityResolver;

type SinkFactory = dyn Fn(&TrackerOptions) -> Arc<dyn ActionSink> + Send + Sync;

pub struct TrackerContext {
    current: ArcSwapOption<ActionTracker>,
    identity: Arc<dyn IdentityResolver>,
    sink_factory: Box<SinkFactory>,
}

impl TrackerContext {
    /// 使用 HTTP 收集端
    pub fn new(identity: Arc<dyn IdentityResolver>) -> Self {
        Self::with_sink_factory(identity, |options: &TrackerOptions| {
            Arc::new(HttpCollectorSink::new(
                &options.collection_server_url,
                options.request_timeout,
            )) as Arc<dyn ActionSink>
        })
    }

    /// 自定义投递端（测试、dry-run）
    pub fn with_sink_factory<F>(identity: Arc<dyn IdentityResolver>, factory: F) -> Self
    where
        F: Fn(&TrackerOptions) -> Arc<dyn ActionSink> + Send + Sync + 'static,
    {
        Self {
            current: ArcSwapOption::empty(),
            identity,
            sink_factory: Box::new(factory),
        }
    }

    /// 以全局配置为默认值、合并覆盖项后创建追踪器
    ///
    /// 重复调用会替换当前追踪器：旧追踪器的定时器立即停止，
    /// 缓冲区不会迁移到新实例，只在后台尽力做最后一次投递。
    pub fn initialize(&self, overrides: TrackerOverrides) -> Arc<ActionTracker> {
        self.initialize_with(TrackerOptions::from_config().merge(overrides))
    }

    pub fn initialize_with(&self, options: TrackerOptions) -> Arc<ActionTracker> {
        let sink = (self.sink_factory)(&options);
        let tracker = Arc::new(ActionTracker::start(
            options,
            sink,
            Arc::clone(&self.identity),
        ));

        if let Some(previous) = self.current.swap(Some(Arc::clone(&tracker))) {
            debug!(
                "TrackerContext: replacing session {} with {}",
                previous.session_id(),
                tracker.session_id()
            );
            Self::retire(previous);
        }
        tracker
    }

    fn retire(previous: Arc<ActionTracker>) {
        previous.stop_timer();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { previous.destroy().await });
            }
            Err(_) => {
                trace!("TrackerContext: no runtime, previous tracker dropped without final flush");
            }
        }
    }

    /// 当前追踪器
    pub fn current(&self) -> Option<Arc<ActionTracker>> {
        self.current.load_full()
    }

    /// 未初始化时静默忽略
    pub fn track(&self, request: TrackRequest) {
        match self.current.load_full() {
            Some(tracker) => tracker.track_action(request),
            None => trace!("TrackerContext: not initialized, dropping {}", request.action_type),
        }
    }

    pub fn set_current_user_id(&self, user_id: Option<String>) {
        if let Some(tracker) = self.current.load_full() {
            tracker.set_current_user_id(user_id);
        }
    }

    /// 页面隐藏时调用
    pub async fn flush(&self) {
        if let Some(tracker) = self.current() {
            tracker.flush().await;
        }
    }

    /// 页面卸载 / 进程退出时调用
    pub async fn destroy(&self) {
        if let Some(tracker) = self.current.swap(None) {
            tracker.destroy().await;
        }
    }
}
