use crate::message::{NotifyChannel, NotifyLevel, NotifyMessage};
use crate::notifier::Notifier;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// 通知管理器
#[derive(Clone)]
pub struct NotifyManager {
    /// 通知器列表
    notifiers: Arc<RwLock<HashMap<NotifyChannel, Box<dyn Notifier>>>>,

    /// 最小通知级别
    min_level: NotifyLevel,
}

impl NotifyManager {
    pub fn new(min_level: NotifyLevel) -> Self {
        Self {
            notifiers: Arc::new(RwLock::new(HashMap::new())),
            min_level,
        }
    }

    /// 注册通知器
    pub async fn register(&self, channel: NotifyChannel, notifier: Box<dyn Notifier>) {
        let mut notifiers = self.notifiers.write().await;
        info!("Registered notifier: {}", notifier.name());
        notifiers.insert(channel, notifier);
    }

    /// 发送通知到指定渠道，返回是否送达
    pub async fn send(&self, channel: NotifyChannel, message: &NotifyMessage) -> bool {
        if !self.should_notify(message.level) {
            return false;
        }

        let notifiers = self.notifiers.read().await;
        match notifiers.get(&channel) {
            Some(notifier) if notifier.is_enabled() => deliver(notifier.as_ref(), message).await,
            _ => false,
        }
    }

    /// 发送通知到所有渠道，返回送达的渠道数
    pub async fn broadcast(&self, message: &NotifyMessage) -> usize {
        if !self.should_notify(message.level) {
            debug!(title = %message.title, "Notification below minimum level, skipped");
            return 0;
        }

        let notifiers = self.notifiers.read().await;
        let mut delivered = 0;

        for notifier in notifiers.values() {
            if notifier.is_enabled() && deliver(notifier.as_ref(), message).await {
                delivered += 1;
            }
        }

        delivered
    }

    /// 检查是否应该发送通知
    fn should_notify(&self, level: NotifyLevel) -> bool {
        level >= self.min_level
    }
}

async fn deliver(notifier: &dyn Notifier, message: &NotifyMessage) -> bool {
    match notifier.send(message).await {
        Ok(result) if result.success => {
            debug!("Notification sent via {}: {}", notifier.name(), message.title);
            true
        }
        Ok(result) => {
            error!("Notification failed via {}: {}", notifier.name(), result.message);
            false
        }
        Err(e) => {
            error!("Notification error via {}: {}", notifier.name(), e);
            false
        }
    }
}

impl Default for NotifyManager {
    fn default() -> Self {
        Self::new(NotifyLevel::Info)
    }
}
