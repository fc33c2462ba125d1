use tokio::sync::watch;

/// 停止令牌，所有阻塞等待都应通过它感知停机
#[derive(Debug, Clone)]
pub struct StopToken {
    rx: watch::Receiver<bool>,
}

impl StopToken {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// 等待停止；发送端已释放时同样视为停止
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use crate::SignalHandler;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stopped_wakes_waiters() {
        let handler = SignalHandler::default();
        let token = handler.stop_token();
        assert!(!token.is_stopped());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.stopped().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        handler.trigger_shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(token.is_stopped());
    }

    #[tokio::test]
    async fn test_dropped_handler_counts_as_stop() {
        let handler = SignalHandler::default();
        let token = handler.stop_token();
        drop(handler);

        tokio::time::timeout(Duration::from_secs(1), token.stopped())
            .await
            .expect("token should resolve once the handler is gone");
    }
}
