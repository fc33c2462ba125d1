use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::token::StopToken;

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM - 优雅关闭
    Term,

    /// SIGINT - Ctrl+C
    Interrupt,

    /// 手动触发
    Manual,
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("Failed to install signal handler: {0}")]
    SignalInstall(#[from] std::io::Error),
}

/// 信号处理器
///
/// 关闭原因通过 broadcast 分发给订阅者；停止状态通过 watch 保持，
/// 后订阅的 [`StopToken`] 也能立即观察到。
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl SignalHandler {
    pub fn new() -> (Self, broadcast::Receiver<ShutdownSignal>) {
        let (tx, rx) = broadcast::channel(16);
        let (stop_tx, _) = watch::channel(false);
        (
            Self {
                shutdown_tx: tx,
                stop_tx: Arc::new(stop_tx),
            },
            rx,
        )
    }

    /// 等待系统信号
    #[cfg(unix)]
    pub async fn wait_for_system_signal(&self) -> Result<ShutdownSignal, ShutdownError> {
        use signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let received = tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                ShutdownSignal::Term
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                ShutdownSignal::Interrupt
            }
        };

        self.fire(received);
        Ok(received)
    }

    /// 等待系统信号（Windows 版本）
    #[cfg(not(unix))]
    pub async fn wait_for_system_signal(&self) -> Result<ShutdownSignal, ShutdownError> {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        self.fire(ShutdownSignal::Interrupt);
        Ok(ShutdownSignal::Interrupt)
    }

    /// 手动触发关闭
    pub fn trigger_shutdown(&self) {
        info!("Manual shutdown triggered");
        self.fire(ShutdownSignal::Manual);
    }

    fn fire(&self, signal: ShutdownSignal) {
        self.stop_tx.send_replace(true);
        let _ = self.shutdown_tx.send(signal);
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// 获取停止令牌
    pub fn stop_token(&self) -> StopToken {
        StopToken::new(self.stop_tx.subscribe())
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_handler_creation() {
        let (handler, mut rx) = SignalHandler::new();

        // 手动触发关闭
        handler.trigger_shutdown();

        let signal = rx.recv().await.unwrap();
        assert_eq!(signal, ShutdownSignal::Manual);
        assert!(handler.is_shutting_down());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let (handler, _rx1) = SignalHandler::new();
        let mut rx2 = handler.subscribe();
        let mut rx3 = handler.subscribe();

        handler.trigger_shutdown();

        assert_eq!(rx2.recv().await.unwrap(), ShutdownSignal::Manual);
        assert_eq!(rx3.recv().await.unwrap(), ShutdownSignal::Manual);
    }

    #[tokio::test]
    async fn test_late_token_sees_stop() {
        let handler = SignalHandler::default();
        handler.trigger_shutdown();

        let token = handler.stop_token();
        assert!(token.is_stopped());
    }
}
