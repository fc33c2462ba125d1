use crossbeam::queue::ArrayQueue;
use icapture_metrics::PipelineMetrics;
use icapture_shutdown::StopToken;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// 等待超时，挤掉了最旧元素
    DroppedOldest,
}

/// 出队结果
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    Item(T),
    TimedOut,
    Stopped,
    /// 已关闭且取空
    Closed,
}

/// 有界队列
///
/// 入队在队满时最多等待给定时长，超时后丢弃最旧元素再放入，内存始终有界。
/// 出队可设超时并感知停止信号。关闭后不再接受新元素，已有元素仍可取出。
pub struct BoundedQueue<T> {
    name: String,
    items: ArrayQueue<T>,
    not_empty: Notify,
    not_full: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    metrics: Option<PipelineMetrics>,
}

impl<T: Send> BoundedQueue<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            items: ArrayQueue::new(capacity.max(1)),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 入队，队满时最多等待 `timeout`，之后丢弃最旧元素
    ///
    /// 停止信号触发时不再等待，直接丢弃最旧元素放入。
    /// 队列已关闭时原样返回元素。
    pub async fn push(
        &self,
        item: T,
        timeout: Duration,
        stop: &StopToken,
    ) -> Result<PushOutcome, T> {
        self.push_until(item, timeout, stop.stopped()).await
    }

    /// 入队，只受超时约束
    pub async fn push_timeout(&self, item: T, timeout: Duration) -> Result<PushOutcome, T> {
        self.push_until(item, timeout, std::future::pending::<()>()).await
    }

    async fn push_until(
        &self,
        item: T,
        timeout: Duration,
        stop: impl Future<Output = ()>,
    ) -> Result<PushOutcome, T> {
        let deadline = Instant::now() + timeout;
        let mut item = item;
        tokio::pin!(stop);

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(item);
            }
            match self.items.push(item) {
                Ok(()) => {
                    self.after_push();
                    return Ok(PushOutcome::Enqueued);
                }
                Err(back) => item = back,
            }

            tokio::select! {
                biased;
                _ = &mut notified => {}
                _ = &mut stop => break,
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        if self.is_closed() {
            return Err(item);
        }
        if self.items.force_push(item).is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_queue_drop(&self.name);
            }
            debug!(queue = %self.name, dropped, "Queue full, dropped oldest item");
        }
        self.after_push();
        Ok(PushOutcome::DroppedOldest)
    }

    /// 非阻塞入队，队满或已关闭时返回元素
    pub fn try_push(&self, item: T) -> Result<(), T> {
        if self.is_closed() {
            return Err(item);
        }
        self.items.push(item)?;
        self.after_push();
        Ok(())
    }

    /// 出队，最多等待 `timeout`，停止信号触发时立即返回
    pub async fn pop(&self, timeout: Duration, stop: &StopToken) -> Popped<T> {
        self.pop_until(timeout, stop.stopped()).await
    }

    /// 出队，只受超时约束（停机排空时使用）
    pub async fn pop_timeout(&self, timeout: Duration) -> Popped<T> {
        self.pop_until(timeout, std::future::pending::<()>()).await
    }

    async fn pop_until(&self, timeout: Duration, stop: impl Future<Output = ()>) -> Popped<T> {
        let deadline = Instant::now() + timeout;
        tokio::pin!(stop);

        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.items.pop() {
                self.not_full.notify_one();
                self.report_depth();
                return Popped::Item(item);
            }
            if self.is_closed() {
                return Popped::Closed;
            }

            tokio::select! {
                biased;
                _ = &mut notified => {}
                _ = &mut stop => return Popped::Stopped,
                _ = tokio::time::sleep_until(deadline) => return Popped::TimedOut,
            }
        }
    }

    /// 关闭队列并唤醒所有等待者
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(queue = %self.name, remaining = self.len(), "Queue closed");
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// 因队满被丢弃的元素总数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn after_push(&self) {
        self.not_empty.notify_one();
        self.report_depth();
    }

    fn report_depth(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(&self.name, self.items.len());
        }
    }
}
