//! 投递端
//!
//! [`ActionSink`] 是 tracker 与收集端之间的接缝，测试里用内存实现替换。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;
use ureq::Agent;

use super::ActionRecord;
use crate::errors::TrackerError;

/// 收集端路径
pub const COLLECT_PATH: &str = "/collect";

/// 请求体：`{ "actions": [...] }`
#[derive(Debug, Serialize)]
pub struct CollectBatch<'a> {
    pub actions: &'a [ActionRecord],
}

/// 批量投递 Sink
///
/// 返回 Err 时 tracker 会把整批记录放回缓冲区头部。
#[async_trait::async_trait]
pub trait ActionSink: Send + Sync {
    async fn send_batch(&self, actions: Vec<ActionRecord>) -> anyhow::Result<()>;

    /// 获取 sink 名称（用于日志）
    fn name(&self) -> &'static str;
}

/// HTTP 收集端
///
/// `POST {collection_server_url}/collect`，任意 2xx 视为成功，响应体忽略。
pub struct HttpCollectorSink {
    collect_url: String,
    agent: Agent,
}

impl HttpCollectorSink {
    pub fn new(collection_server_url: &str, timeout: Duration) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            collect_url: Self::collect_url_for(collection_server_url),
            agent,
        }
    }

    /// 拼接收集地址，去掉基础地址末尾的 `/`
    pub fn collect_url_for(collection_server_url: &str) -> String {
        format!(
            "{}{}",
            collection_server_url.trim_end_matches('/'),
            COLLECT_PATH
        )
    }

    pub fn collect_url(&self) -> &str {
        &self.collect_url
    }

    /// 同步发送（在 spawn_blocking 中调用）
    fn post_sync(agent: &Agent, url: &str, body: &serde_json::Value) -> Result<(), TrackerError> {
        let resp = agent
            .post(url)
            .send_json(body)
            .map_err(|e| TrackerError::delivery(format!("POST {} failed: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TrackerError::delivery(format!(
                "POST {} returned {}",
                url,
                status.as_u16()
            )));
        }

        trace!("Collector accepted batch with status {}", status.as_u16());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionSink for HttpCollectorSink {
    async fn send_batch(&self, actions: Vec<ActionRecord>) -> anyhow::Result<()> {
        let body = serde_json::to_value(CollectBatch { actions: &actions })
            .map_err(TrackerError::from)?;
        let agent = self.agent.clone();
        let url = self.collect_url.clone();

        // ureq 是同步客户端，放到阻塞线程池中执行
        tokio::task::spawn_blocking(move || Self::post_sync(&agent, &url, &body))
            .await
            .map_err(|e| TrackerError::delivery(format!("send task failed: {}", e)))??;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "HttpCollector"
    }
}

/// 只打印批次，不发网络请求（CLI `--dry-run` 使用）
pub struct StdoutSink;

impl StdoutSink {
    pub fn arc() -> Arc<dyn ActionSink> {
        Arc::new(Self)
    }
}

#[async_trait::async_trait]
impl ActionSink for StdoutSink {
    async fn send_batch(&self, actions: Vec<ActionRecord>) -> anyhow::Result<()> {
        let body = serde_json::to_string_pretty(&CollectBatch { actions: &actions })
            .map_err(TrackerError::from)?;
        println!("{}", body);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Stdout"
    }
}
