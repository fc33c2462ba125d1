use crate::device::CameraDevice;
use crate::quality::measure_brightness;
use crate::{CameraError, Result};
use bytes::Bytes;
use icapture_config::CameraConfig;
use icapture_logging::LogThrottle;
use icapture_metrics::PipelineMetrics;
use icapture_shutdown::{SignalHandler, StopToken};
use icapture_types::{CameraRole, Clock, ExponentialBackoff, Frame, MonotonicClock};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 摄像头源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

/// 创建一对最新帧通道
pub fn frame_channel() -> (watch::Sender<Option<Frame>>, FrameReceiver) {
    let (tx, rx) = watch::channel(None);
    (tx, FrameReceiver { rx })
}

/// 最新帧接收端
///
/// 只保留最新一帧，消费慢时旧帧被覆盖。`None` 表示摄像头当前不可用。
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    rx: watch::Receiver<Option<Frame>>,
}

impl FrameReceiver {
    /// 等待下一帧；采集端释放后返回 `None`
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }

    /// 当前最新帧
    pub fn latest(&self) -> Option<Frame> {
        self.rx.borrow().clone()
    }
}

/// 单路摄像头源
///
/// 启动后在独立任务中采集，连续读取失败达到阈值即判定断线，
/// 按指数退避无限重连。断线期间 [`CameraSource::read_frame`] 返回 `None`，
/// 不会阻塞调用方。
pub struct CameraSource {
    config: CameraConfig,
    role: CameraRole,
    clock: Arc<dyn Clock>,
    metrics: Option<PipelineMetrics>,
    device: Mutex<Option<Box<dyn CameraDevice>>>,
    frame_tx: Arc<watch::Sender<Option<Frame>>>,
    state_tx: Arc<watch::Sender<SourceState>>,
    stop: SignalHandler,
}

impl CameraSource {
    pub fn new(config: CameraConfig, role: CameraRole, device: Box<dyn CameraDevice>) -> Self {
        let (frame_tx, _) = watch::channel(None);
        let (state_tx, _) = watch::channel(SourceState::Idle);
        let (stop, _) = SignalHandler::new();

        Self {
            config,
            role,
            clock: Arc::new(MonotonicClock),
            metrics: None,
            device: Mutex::new(Some(device)),
            frame_tx: Arc::new(frame_tx),
            state_tx: Arc::new(state_tx),
            stop,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn camera_id(&self) -> &str {
        &self.config.camera_id
    }

    pub fn location(&self) -> &str {
        &self.config.location
    }

    pub fn role(&self) -> CameraRole {
        self.role
    }

    /// 启动采集任务
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let device = self
            .device
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| CameraError::AlreadyStarted(self.config.camera_id.clone()))?;

        info!(
            camera = %self.config.camera_id,
            role = %self.role,
            device = %device.describe(),
            "Starting camera source"
        );

        let worker = CaptureWorker {
            config: self.config.clone(),
            role: self.role,
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
            frame_tx: self.frame_tx.clone(),
            state_tx: self.state_tx.clone(),
            stop: self.stop.stop_token(),
            throttle: LogThrottle::default(),
            sequence: 0,
        };

        Ok(tokio::spawn(worker.run(device)))
    }

    /// 最新一帧；断线或尚未出帧时返回 `None`
    pub fn read_frame(&self) -> Option<Frame> {
        self.frame_tx.borrow().clone()
    }

    /// 订阅新帧
    pub fn subscribe(&self) -> FrameReceiver {
        FrameReceiver {
            rx: self.frame_tx.subscribe(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == SourceState::Streaming
    }

    pub fn state(&self) -> SourceState {
        *self.state_tx.borrow()
    }

    /// 停止采集并释放设备
    pub fn stop(&self) {
        if !self.stop.is_shutting_down() {
            info!(camera = %self.config.camera_id, "Stopping camera source");
            self.stop.trigger_shutdown();
        }
    }
}

enum StreamEnd {
    Stopped,
    Disconnected,
}

struct CaptureWorker {
    config: CameraConfig,
    role: CameraRole,
    clock: Arc<dyn Clock>,
    metrics: Option<PipelineMetrics>,
    frame_tx: Arc<watch::Sender<Option<Frame>>>,
    state_tx: Arc<watch::Sender<SourceState>>,
    stop: StopToken,
    throttle: LogThrottle,
    sequence: u64,
}

impl CaptureWorker {
    async fn run(mut self, mut device: Box<dyn CameraDevice>) {
        let mut backoff =
            ExponentialBackoff::new(self.config.reconnect_base(), self.config.reconnect_max());

        loop {
            if self.stop.is_stopped() {
                break;
            }

            self.set_state(SourceState::Connecting);
            let opened = tokio::select! {
                _ = self.stop.stopped() => break,
                r = timeout(self.config.read_timeout(), device.open()) => r,
            };

            match opened {
                Ok(Ok(())) => {
                    info!(camera = %self.config.camera_id, device = %device.describe(), "Camera connected");
                    backoff.reset();
                    self.set_healthy(true);
                    self.set_state(SourceState::Streaming);

                    let end = self.stream(device.as_mut()).await;

                    device.close().await;
                    self.frame_tx.send_replace(None);
                    self.set_healthy(false);

                    if let StreamEnd::Stopped = end {
                        break;
                    }
                    warn!(
                        camera = %self.config.camera_id,
                        failures = self.config.max_read_failures,
                        "Camera disconnected after consecutive read failures"
                    );
                }
                Ok(Err(e)) => {
                    warn!(camera = %self.config.camera_id, error = %e, "Failed to open camera");
                }
                Err(_) => {
                    warn!(camera = %self.config.camera_id, "Camera open timed out");
                }
            }

            self.set_state(SourceState::Reconnecting);
            let delay = backoff.next_delay();
            if let Some(metrics) = &self.metrics {
                metrics.record_reconnect(&self.config.camera_id);
            }
            info!(
                camera = %self.config.camera_id,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting camera"
            );

            tokio::select! {
                _ = self.stop.stopped() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        device.close().await;
        self.frame_tx.send_replace(None);
        self.set_healthy(false);
        self.set_state(SourceState::Stopped);
        info!(camera = %self.config.camera_id, "Camera source stopped");
    }

    async fn stream(&mut self, device: &mut dyn CameraDevice) -> StreamEnd {
        let max_failures = self.config.max_read_failures.max(1);
        let read_timeout = self.config.read_timeout();
        let paced = !device.self_paced();
        let mut ticker = tokio::time::interval(self.config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures = 0u32;

        loop {
            let stop = self.stop.clone();
            let grabbed = tokio::select! {
                _ = stop.stopped() => return StreamEnd::Stopped,
                r = async {
                    if paced {
                        ticker.tick().await;
                    }
                    timeout(read_timeout, device.grab()).await
                } => r,
            };

            let result = match grabbed {
                Ok(Ok(jpeg)) => self.publish(jpeg).await,
                Ok(Err(e)) => Err(e),
                Err(_) => Err(CameraError::Timeout),
            };

            match result {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    debug!(
                        camera = %self.config.camera_id,
                        failures,
                        error = %e,
                        "Camera read failed"
                    );
                    if failures >= max_failures {
                        return StreamEnd::Disconnected;
                    }
                }
            }
        }
    }

    async fn publish(&mut self, jpeg: Bytes) -> Result<()> {
        let timestamp = self.clock.now();

        let data = jpeg.clone();
        let brightness = tokio::task::spawn_blocking(move || measure_brightness(&data))
            .await
            .map_err(|e| CameraError::Decode(e.to_string()))??;

        let low_light = brightness < self.config.min_brightness;
        if low_light && self.throttle.allow(&self.config.camera_id) {
            warn!(
                camera = %self.config.camera_id,
                brightness,
                threshold = self.config.min_brightness,
                "Low light, OCR may fail"
            );
        }

        self.sequence += 1;
        let frame = Frame::new(
            self.config.camera_id.clone(),
            self.role,
            timestamp,
            jpeg,
            brightness,
        )
        .with_low_light(low_light)
        .with_sequence(self.sequence);

        if let Some(metrics) = &self.metrics {
            metrics.record_frame(&self.config.camera_id, low_light);
        }
        self.frame_tx.send_replace(Some(frame));
        Ok(())
    }

    fn set_state(&self, state: SourceState) {
        self.state_tx.send_replace(state);
    }

    fn set_healthy(&self, healthy: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.set_camera_healthy(&self.config.camera_id, healthy);
        }
    }
}
