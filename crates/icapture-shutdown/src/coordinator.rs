use crate::signal::SignalHandler;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{error, info, warn};

/// 关闭结果
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// 在宽限期内正常退出的任务
    pub completed: Vec<String>,
    /// 超过宽限期被强制中止的任务
    pub aborted: Vec<String>,
    /// 异常退出（panic）的任务
    pub failed: Vec<String>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty() && self.failed.is_empty()
    }
}

/// 关闭协调器：发出停止信号后按注册顺序等待各阶段任务退出，
/// 整体宽限期耗尽后中止剩余任务
pub struct ShutdownCoordinator {
    signal_handler: SignalHandler,
    tasks: Vec<(String, JoinHandle<()>)>,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    pub fn new(signal_handler: SignalHandler, grace_period: Duration) -> Self {
        Self {
            signal_handler,
            tasks: Vec::new(),
            grace_period,
        }
    }

    /// 注册需要等待的任务
    pub fn register(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.push((name.into(), handle));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// 获取信号处理器的引用
    pub fn signal_handler(&self) -> &SignalHandler {
        &self.signal_handler
    }

    /// 运行关闭流程
    pub async fn shutdown(self) -> ShutdownReport {
        if !self.signal_handler.is_shutting_down() {
            self.signal_handler.trigger_shutdown();
        }

        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.grace_period;
        let mut report = ShutdownReport::default();

        info!(
            tasks = self.tasks.len(),
            grace_ms = self.grace_period.as_millis() as u64,
            "Waiting for pipeline tasks to finish"
        );

        for (name, mut handle) in self.tasks {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {
                    info!(task = %name, "Task finished");
                    report.completed.push(name);
                }
                Ok(Err(e)) => {
                    error!(task = %name, error = %e, "Task terminated abnormally");
                    report.failed.push(name);
                }
                Err(_) => {
                    warn!(task = %name, "Task did not finish within grace period, aborting");
                    handle.abort();
                    report.aborted.push(name);
                }
            }
        }

        report.elapsed = start.elapsed();
        info!("Shutdown complete in {:?}", report.elapsed);

        report
    }
}
