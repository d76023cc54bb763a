//! 通知投递接口。SMTP 等具体投递渠道在本 crate 之外实现。

use async_trait::async_trait;
use tracing::{info, warn};

use crate::common::error::NotificationError;

#[derive(Debug, Clone)]
pub struct NotificationMessage {
    pub subject: String,
    pub body: String,
}

/// 通知接收端，按用户键投递。
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(
        &self,
        user_key: &str,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError>;
}

/// 投递一条通知：失败时重试一次，仍失败则记录日志后丢弃。
/// 返回是否最终投递成功。单个用户的投递失败不会影响其他用户。
pub async fn deliver(
    sink: &dyn NotificationSink,
    user_key: &str,
    message: &NotificationMessage,
) -> bool {
    match sink.send(user_key, message).await {
        Ok(()) => return true,
        Err(err) => {
            warn!("用户 {} 的通知投递失败，重试一次: {}", user_key, err);
        }
    }

    match sink.send(user_key, message).await {
        Ok(()) => true,
        Err(err) => {
            warn!("用户 {} 的通知重试仍失败，本轮放弃: {}", user_key, err);
            false
        }
    }
}

/// 日志通知端：只把通知写进日志，不做真实投递。干跑模式使用。
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(
        &self,
        user_key: &str,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError> {
        info!("[通知] {} | {} | {}", user_key, message.subject, message.body);
        Ok(())
    }
}
