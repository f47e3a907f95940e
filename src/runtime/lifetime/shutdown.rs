use std::time::Duration;

use tokio::signal;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::analytics::TrackerContext;

/// 最后一次投递的超时时间（秒）
const DESTROY_TIMEOUT_SECS: u64 = 10;

/// 等待 Ctrl+C，然后销毁追踪器
///
/// 进程宿主中的 Ctrl+C 对应页面卸载。
pub async fn listen_for_shutdown(context: &TrackerContext) {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, flushing pending actions...");
        }
        Err(e) => {
            warn!(
                "Failed to listen for Ctrl+C: {}. Proceeding with shutdown anyway.",
                e
            );
        }
    }

    destroy_with_timeout(context).await;
}

/// 带超时的销毁，在途投递超时后放弃
pub async fn destroy_with_timeout(context: &TrackerContext) {
    let pending = context
        .current()
        .map(|tracker| tracker.pending_len())
        .unwrap_or(0);

    match timeout(Duration::from_secs(DESTROY_TIMEOUT_SECS), context.destroy()).await {
        Ok(()) => {
            info!("Tracker destroyed ({} actions were pending)", pending);
        }
        Err(_) => {
            error!(
                "Tracker final flush timed out after {} seconds",
                DESTROY_TIMEOUT_SECS
            );
        }
    }
}
