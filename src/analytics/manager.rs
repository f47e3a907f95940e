//! 行为追踪管理器
//!
//! 负责收集交互记录并批量投递到收集端，支持：
//! - 点击累积到阈值后刷新
//! - like / bookmark 入队后立即刷新
//! - 定时刷新
//! - 投递失败时整批放回缓冲区头部，下次触发时重试

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, trace, warn};

use super::builders::{bookmark_request, click_request, like_request};
use super::{ActionRecord, ActionSink, ActionType, PageContext, TrackRequest};
use crate::config::TrackerConfig;
use crate::identity::IdentityResolver;

/// 追踪器运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerOptions {
    pub collection_server_url: String,
    pub debug: bool,
    /// 点击累积阈值
    pub buffer_size: usize,
    /// 定时刷新间隔，零表示不启动定时器
    pub flush_interval: Duration,
    /// 缓冲区上限，超出时丢弃最旧的记录；None 表示不设上限
    pub max_pending: Option<usize>,
    pub request_timeout: Duration,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self::from(&TrackerConfig::default())
    }
}

impl From<&TrackerConfig> for TrackerOptions {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            collection_server_url: config.collection_server_url.clone(),
            debug: config.debug,
            buffer_size: config.buffer_size,
            flush_interval: Duration::from_millis(config.flush_interval),
            max_pending: config.max_pending,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }
}

impl TrackerOptions {
    /// 以全局配置为默认值
    pub fn from_config() -> Self {
        Self::from(&crate::config::get_config().tracker)
    }

    /// 合并调用方覆盖项
    pub fn merge(mut self, overrides: TrackerOverrides) -> Self {
        if let Some(url) = overrides.collection_server_url {
            self.collection_server_url = url;
        }
        if let Some(debug) = overrides.debug {
            self.debug = debug;
        }
        if let Some(size) = overrides.buffer_size {
            self.buffer_size = size;
        }
        if let Some(ms) = overrides.flush_interval {
            self.flush_interval = Duration::from_millis(ms);
        }
        if overrides.max_pending.is_some() {
            self.max_pending = overrides.max_pending;
        }
        self
    }
}

/// 调用方可覆盖的选项（flush_interval 单位为毫秒）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerOverrides {
    #[serde(default)]
    pub collection_server_url: Option<String>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub buffer_size: Option<usize>,
    #[serde(default)]
    pub flush_interval: Option<u64>,
    #[serde(default)]
    pub max_pending: Option<usize>,
}

/// 待投递记录缓冲区
struct ActionBuffer {
    data: Mutex<VecDeque<ActionRecord>>,
    /// 单一在途投递槽
    flush_lock: AsyncMutex<()>,
    /// 已有排队中的触发式刷新（防止重复 spawn）
    flush_pending: AtomicBool,
    max_pending: Option<usize>,
}

impl ActionBuffer {
    fn new(max_pending: Option<usize>) -> Self {
        Self {
            data: Mutex::new(VecDeque::new()),
            flush_lock: AsyncMutex::new(()),
            flush_pending: AtomicBool::new(false),
            max_pending,
        }
    }

    /// 追加记录，返回当前长度
    fn push(&self, record: ActionRecord) -> usize {
        let mut data = self.data.lock();
        data.push_back(record);
        self.enforce_limit(&mut data);
        data.len()
    }

    /// 取出全部记录并清空（同一临界区内完成，新记录落入空缓冲区）
    fn drain(&self) -> Vec<ActionRecord> {
        let mut data = self.data.lock();
        std::mem::take(&mut *data).into()
    }

    /// 失败的批次放回头部，排在投递期间新入队的记录之前
    fn restore(&self, batch: Vec<ActionRecord>) {
        let mut data = self.data.lock();
        let newer = std::mem::take(&mut *data);
        let mut merged: VecDeque<ActionRecord> = batch.into();
        merged.extend(newer);
        *data = merged;
        self.enforce_limit(&mut data);
    }

    fn enforce_limit(&self, data: &mut VecDeque<ActionRecord>) {
        let Some(limit) = self.max_pending else {
            return;
        };
        if data.len() > limit {
            let dropped = data.len() - limit;
            for _ in 0..dropped {
                data.pop_front();
            }
            warn!(
                "ActionTracker: buffer over limit {}, dropped {} oldest records",
                limit, dropped
            );
        }
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }

    fn snapshot(&self) -> Vec<ActionRecord> {
        self.data.lock().iter().cloned().collect()
    }
}

/// 行为追踪器
///
/// 每个页面 / 进程持有一个实例，通过 [`ActionTracker::destroy`] 显式销毁。
/// 状态完全封装在结构体内部，便于测试和多实例使用。
pub struct ActionTracker {
    options: TrackerOptions,
    session_id: String,
    buffer: Arc<ActionBuffer>,
    sink: Arc<dyn ActionSink>,
    identity: Arc<dyn IdentityResolver>,
    /// 显式设置的用户 ID，优先于 identity 解析
    current_user_id: RwLock<Option<String>>,
    page: RwLock<PageContext>,
    /// 定时器停止信号（发送端销毁时定时任务同样退出）
    timer_shutdown: watch::Sender<bool>,
    active: AtomicBool,
}

impl ActionTracker {
    /// 创建追踪器并启动定时刷新任务
    ///
    /// 当前没有 Tokio runtime 时不启动定时器，记录只在显式 flush 时投递。
    pub fn start(
        options: TrackerOptions,
        sink: Arc<dyn ActionSink>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        let (timer_shutdown, shutdown_rx) = watch::channel(false);
        let tracker = Self {
            session_id: generate_session_id(),
            buffer: Arc::new(ActionBuffer::new(options.max_pending)),
            sink,
            identity,
            current_user_id: RwLock::new(None),
            page: RwLock::new(PageContext::default()),
            timer_shutdown,
            active: AtomicBool::new(true),
            options,
        };

        tracker.spawn_timer(shutdown_rx);

        if tracker.options.debug {
            info!(
                "ActionTracker: started session {} (sink: {}, buffer_size: {}, flush_interval: {:?})",
                tracker.session_id,
                tracker.sink.name(),
                tracker.options.buffer_size,
                tracker.options.flush_interval
            );
        }
        tracker
    }

    fn spawn_timer(&self, shutdown_rx: watch::Receiver<bool>) {
        if self.options.flush_interval.is_zero() {
            debug!("ActionTracker: flush interval is zero, timer disabled");
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("ActionTracker: no Tokio runtime, periodic flush disabled");
            return;
        };

        let buffer = Arc::clone(&self.buffer);
        let sink = Arc::clone(&self.sink);
        let interval = self.options.flush_interval;
        let debug = self.options.debug;
        handle.spawn(Self::run_timer(buffer, sink, interval, debug, shutdown_rx));
    }

    /// 定时刷新循环
    ///
    /// 只在 sleep 处等待停止信号，已经开始的投递会执行完毕。
    async fn run_timer(
        buffer: Arc<ActionBuffer>,
        sink: Arc<dyn ActionSink>,
        interval: Duration,
        debug: bool,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = sleep(interval) => {}
                _ = shutdown.changed() => break,
            }

            trace!("ActionTracker: Triggering scheduled flush");
            if let Ok(_guard) = buffer.flush_lock.try_lock() {
                Self::flush_buffer(&buffer, &sink, debug).await;
            } else {
                trace!("ActionTracker: flush already in progress, skipping scheduled flush");
            }
        }
        trace!("ActionTracker: timer stopped");
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 设置当前用户，只影响之后入队的记录
    pub fn set_current_user_id(&self, user_id: Option<String>) {
        if self.options.debug {
            debug!("ActionTracker: current user set to {:?}", user_id);
        }
        *self.current_user_id.write() = user_id;
    }

    pub fn set_page_context(&self, page: PageContext) {
        *self.page.write() = page;
    }

    /// 显式 ID > 凭据解析 > 匿名
    pub fn resolve_user_id(&self) -> Option<String> {
        if let Some(id) = self.current_user_id.read().clone() {
            return Some(id);
        }
        self.identity.resolve_user_id()
    }

    fn enrich(&self, request: TrackRequest) -> ActionRecord {
        let place_category = request.resolved_category();
        let page = self.page.read().clone();
        ActionRecord {
            user_id: self.resolve_user_id(),
            place_id: request.place_id,
            place_category,
            action_type: request.action_type,
            action_value: request.action_value,
            action_detail: request.action_detail,
            session_id: self.session_id.clone(),
            page_url: page.page_url,
            user_agent: page.user_agent,
            referrer: page.referrer,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// 记录一次交互（不阻塞，不返回错误）
    pub fn track_action(&self, request: TrackRequest) {
        if !self.is_active() {
            debug!(
                "ActionTracker: tracker destroyed, dropping {} on {}",
                request.action_type, request.place_id
            );
            return;
        }

        let record = self.enrich(request);
        let immediate = record.action_type.flushes_immediately();
        if self.options.debug {
            debug!(
                "ActionTracker: queued {} on {}",
                record.action_type, record.place_id
            );
        }

        let current_size = self.buffer.push(record);
        trace!("ActionTracker: Current buffer size: {}", current_size);

        if immediate || current_size >= self.options.buffer_size {
            self.request_flush();
        }
    }

    pub fn track(
        &self,
        action_type: ActionType,
        place_id: impl Into<String>,
        action_value: Option<i64>,
        action_detail: Option<Map<String, Value>>,
    ) {
        let mut request = TrackRequest::new(action_type, place_id);
        request.action_value = action_value;
        if let Some(detail) = action_detail {
            request.action_detail = detail;
        }
        self.track_action(request);
    }

    pub fn track_click(&self, place_id: impl Into<String>, extra: Option<Map<String, Value>>) {
        self.track_action(click_request(place_id, extra));
    }

    pub fn track_like(
        &self,
        place_id: impl Into<String>,
        is_liked: bool,
        extra: Option<Map<String, Value>>,
    ) {
        self.track_action(like_request(place_id, is_liked, extra));
    }

    pub fn track_bookmark(
        &self,
        place_id: impl Into<String>,
        is_bookmarked: bool,
        extra: Option<Map<String, Value>>,
    ) {
        self.track_action(bookmark_request(place_id, is_bookmarked, extra));
    }

    /// 触发一次后台刷新
    ///
    /// 使用 compare_exchange 合并触发：已有排队中的刷新时不再 spawn，
    /// 排队中的任务在拿到投递槽后才清空缓冲区，会带上本次记录。
    fn request_flush(&self) {
        if self
            .buffer
            .flush_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("ActionTracker: flush already queued");
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.buffer.flush_pending.store(false, Ordering::Release);
            debug!("ActionTracker: no Tokio runtime, records stay buffered");
            return;
        };

        let buffer = Arc::clone(&self.buffer);
        let sink = Arc::clone(&self.sink);
        let debug = self.options.debug;
        handle.spawn(async move {
            let _guard = buffer.flush_lock.lock().await;
            buffer.flush_pending.store(false, Ordering::Release);
            Self::flush_buffer(&buffer, &sink, debug).await;
        });
    }

    /// 立即投递当前缓冲区（等待在途投递结束后执行）
    pub async fn flush(&self) {
        if !self.is_active() {
            debug!("ActionTracker: flush ignored, tracker destroyed");
            return;
        }
        self.flush_now().await;
    }

    async fn flush_now(&self) {
        let _guard = self.buffer.flush_lock.lock().await;
        Self::flush_buffer(&self.buffer, &self.sink, self.options.debug).await;
    }

    /// 执行实际的投递
    async fn flush_buffer(buffer: &ActionBuffer, sink: &Arc<dyn ActionSink>, debug: bool) {
        let batch = buffer.drain();

        if batch.is_empty() {
            trace!("ActionTracker: No actions to flush");
            return;
        }

        let count = batch.len();
        match sink.send_batch(batch.clone()).await {
            Ok(()) => {
                if debug {
                    debug!("ActionTracker: Successfully sent {} actions", count);
                }
            }
            Err(e) => {
                // 投递失败，整批放回头部
                buffer.restore(batch);
                if debug {
                    warn!(
                        "ActionTracker: send_batch failed: {}, {} actions restored to buffer",
                        e, count
                    );
                } else {
                    debug!(
                        "ActionTracker: send_batch failed: {}, {} actions restored to buffer",
                        e, count
                    );
                }
            }
        }
    }

    /// 停止定时器（幂等）
    pub fn stop_timer(&self) {
        // 没有接收端说明定时器未启动或已退出
        let _ = self.timer_shutdown.send(true);
    }

    /// 销毁：停止定时器并尽力做最后一次投递
    ///
    /// 之后的 track 调用被接受但不会投递。
    pub async fn destroy(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.stop_timer();
        self.flush_now().await;

        if self.options.debug {
            info!(
                "ActionTracker: session {} destroyed, {} actions left undelivered",
                self.session_id,
                self.buffer.len()
            );
        }
    }

    /// 当前缓冲区记录数（用于监控）
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// 当前缓冲区记录的拷贝，按入队顺序
    pub fn pending_actions(&self) -> Vec<ActionRecord> {
        self.buffer.snapshot()
    }
}

impl Drop for ActionTracker {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

/// 会话 ID：`session_{毫秒时间戳}_{随机串}`
fn generate_session_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "session_{}_{}",
        Utc::now().timestamp_millis(),
        &random[..9]
    )
}
