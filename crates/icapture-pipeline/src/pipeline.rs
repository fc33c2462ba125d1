use crate::error::{PipelineError, Result};
use crate::queue::BoundedQueue;
use crate::stages::{
    run_capture_stage, run_detection_stage, run_persistence_stage, CaptureStage, DetectionStage,
    PersistenceStage,
};
use crate::sync::{FrameSynchronizer, SyncStats, SyncedPair};
use crate::verify::{VerificationStats, Verifier};
use icapture_camera::{CameraSource, FrameReceiver};
use icapture_config::PipelineConfig;
use icapture_inference::{Detector, PlateReader};
use icapture_metrics::PipelineMetrics;
use icapture_notify::{NotifyLevel, NotifyManager};
use icapture_shutdown::{ShutdownCoordinator, ShutdownReport, SignalHandler, StopToken};
use icapture_storage::ViolationStore;
use icapture_types::{CandidateViolation, Clock, MonotonicClock};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// 流水线构建器
pub struct PipelineBuilder {
    config: PipelineConfig,
    wide_camera: Option<CameraSource>,
    plate_camera: Option<CameraSource>,
    wide_feed: Option<FrameReceiver>,
    plate_feed: Option<FrameReceiver>,
    detector: Option<Arc<dyn Detector>>,
    plate_reader: Option<Arc<dyn PlateReader>>,
    store: Option<Arc<dyn ViolationStore>>,
    notifier: Option<NotifyManager>,
    clock: Arc<dyn Clock>,
    metrics: Option<PipelineMetrics>,
}

impl PipelineBuilder {
    fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            wide_camera: None,
            plate_camera: None,
            wide_feed: None,
            plate_feed: None,
            detector: None,
            plate_reader: None,
            store: None,
            notifier: None,
            clock: Arc::new(MonotonicClock),
            metrics: None,
        }
    }

    pub fn wide_camera(mut self, camera: CameraSource) -> Self {
        self.wide_camera = Some(camera);
        self
    }

    pub fn plate_camera(mut self, camera: CameraSource) -> Self {
        self.plate_camera = Some(camera);
        self
    }

    /// 直接提供广角帧（回放、测试）
    pub fn wide_feed(mut self, feed: FrameReceiver) -> Self {
        self.wide_feed = Some(feed);
        self
    }

    /// 直接提供车牌帧（回放、测试）
    pub fn plate_feed(mut self, feed: FrameReceiver) -> Self {
        self.plate_feed = Some(feed);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn plate_reader(mut self, reader: Arc<dyn PlateReader>) -> Self {
        self.plate_reader = Some(reader);
        self
    }

    pub fn store(mut self, store: Arc<dyn ViolationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: NotifyManager) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let detector = self
            .detector
            .ok_or(PipelineError::MissingComponent("detector"))?;
        let plate_reader = self
            .plate_reader
            .ok_or(PipelineError::MissingComponent("plate_reader"))?;
        let store = self.store.ok_or(PipelineError::MissingComponent("store"))?;

        let has_wide = self.wide_camera.is_some() || self.wide_feed.is_some();
        let has_plate = self.plate_camera.is_some() || self.plate_feed.is_some();
        if !has_wide && !has_plate {
            return Err(PipelineError::NoCamera);
        }

        Ok(Pipeline {
            config: self.config,
            wide_camera: self.wide_camera,
            plate_camera: self.plate_camera,
            wide_feed: self.wide_feed,
            plate_feed: self.plate_feed,
            detector,
            plate_reader,
            store,
            notifier: self
                .notifier
                .unwrap_or_else(|| NotifyManager::new(NotifyLevel::Warning)),
            clock: self.clock,
            metrics: self.metrics,
        })
    }
}

/// 违章检测流水线
///
/// 采集、检测、持久化三个阶段各自运行在独立任务中，
/// 通过帧队列和结果队列衔接。
pub struct Pipeline {
    config: PipelineConfig,
    wide_camera: Option<CameraSource>,
    plate_camera: Option<CameraSource>,
    wide_feed: Option<FrameReceiver>,
    plate_feed: Option<FrameReceiver>,
    detector: Arc<dyn Detector>,
    plate_reader: Arc<dyn PlateReader>,
    store: Arc<dyn ViolationStore>,
    notifier: NotifyManager,
    clock: Arc<dyn Clock>,
    metrics: Option<PipelineMetrics>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// 启动摄像头与各阶段任务
    pub fn start(self) -> Result<RunningPipeline> {
        let config = self.config;
        let (signal, _) = SignalHandler::new();
        let mut coordinator = ShutdownCoordinator::new(signal.clone(), config.shutdown.grace_period());

        let mut frame_queue = BoundedQueue::new("frames", config.queues.frame_capacity);
        let mut result_queue = BoundedQueue::new("results", config.queues.result_capacity);
        if let Some(metrics) = &self.metrics {
            frame_queue = frame_queue.with_metrics(metrics.clone());
            result_queue = result_queue.with_metrics(metrics.clone());
        }
        let frames = Arc::new(frame_queue);
        let results = Arc::new(result_queue);

        // 先订阅再启动，避免漏掉第一帧
        let mut cameras = Vec::new();
        let mut camera_tasks = Vec::new();
        let mut wide = self.wide_feed;
        let mut plate = self.plate_feed;
        for (camera, feed) in [
            (self.wide_camera, &mut wide),
            (self.plate_camera, &mut plate),
        ] {
            if let Some(camera) = camera {
                *feed = Some(camera.subscribe());
                let handle = camera.start()?;
                camera_tasks.push((format!("camera-{}", camera.camera_id()), handle));
                cameras.push(Arc::new(camera));
            }
        }

        let mut synchronizer = FrameSynchronizer::new(&config.sync, self.clock.clone());
        if let Some(metrics) = &self.metrics {
            synchronizer = synchronizer.with_metrics(metrics.clone());
        }
        let sync_stats = synchronizer.subscribe_stats();

        let verifier = Verifier::new(
            config.verification.clone(),
            config.cameras.wide.location.clone(),
            self.clock.clone(),
        );
        let verification_stats = verifier.subscribe_stats();

        let capture = CaptureStage {
            wide,
            plate,
            synchronizer,
            frames: frames.clone(),
            push_timeout: config.queues.push_timeout(),
            stop: signal.stop_token(),
        };
        coordinator.register("capture", tokio::spawn(run_capture_stage(capture)));

        let detection = DetectionStage {
            frames: frames.clone(),
            results: results.clone(),
            detector: self.detector,
            plate_reader: self.plate_reader,
            verifier,
            history: Some(self.store.clone()),
            clock: self.clock.clone(),
            push_timeout: config.queues.push_timeout(),
            pop_timeout: config.queues.pop_timeout(),
            sweep_interval: config.verification.sweep_interval(),
            drain: config.shutdown.drain,
            stop: signal.stop_token(),
            metrics: self.metrics.clone(),
        };
        coordinator.register("detection", tokio::spawn(run_detection_stage(detection)));

        let persistence = PersistenceStage {
            results: results.clone(),
            store: self.store,
            notifier: self.notifier,
            config: config.persistence.clone(),
            pop_timeout: config.queues.pop_timeout(),
            drain: config.shutdown.drain,
            stop: signal.stop_token(),
            metrics: self.metrics.clone(),
        };
        coordinator.register("persistence", tokio::spawn(run_persistence_stage(persistence)));

        for (name, handle) in camera_tasks {
            coordinator.register(name, handle);
        }

        info!(
            cameras = cameras.len(),
            tasks = coordinator.task_count(),
            "Pipeline started"
        );

        Ok(RunningPipeline {
            signal,
            coordinator,
            cameras,
            frames,
            results,
            sync_stats,
            verification_stats,
        })
    }
}

/// 运行中的流水线
pub struct RunningPipeline {
    signal: SignalHandler,
    coordinator: ShutdownCoordinator,
    cameras: Vec<Arc<CameraSource>>,
    frames: Arc<BoundedQueue<SyncedPair>>,
    results: Arc<BoundedQueue<CandidateViolation>>,
    sync_stats: watch::Receiver<SyncStats>,
    verification_stats: watch::Receiver<VerificationStats>,
}

impl RunningPipeline {
    /// 发出停止信号，不等待
    pub fn stop(&self) {
        for camera in &self.cameras {
            camera.stop();
        }
        if !self.signal.is_shutting_down() {
            self.signal.trigger_shutdown();
        }
    }

    /// 停止并等待各阶段退出，超过宽限期的任务被中止
    pub async fn shutdown(self) -> ShutdownReport {
        self.stop();
        info!(
            frames_pending = self.frames.len(),
            results_pending = self.results.len(),
            "Shutting down pipeline"
        );
        self.coordinator.shutdown().await
    }

    pub fn stop_token(&self) -> StopToken {
        self.signal.stop_token()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync_stats.borrow().clone()
    }

    pub fn verification_stats(&self) -> VerificationStats {
        self.verification_stats.borrow().clone()
    }

    pub fn cameras(&self) -> &[Arc<CameraSource>] {
        &self.cameras
    }

    /// (帧队列, 结果队列) 当前深度
    pub fn queue_depths(&self) -> (usize, usize) {
        (self.frames.len(), self.results.len())
    }

    /// (帧队列, 结果队列) 累计丢弃数
    pub fn queue_drops(&self) -> (u64, u64) {
        (self.frames.dropped(), self.results.dropped())
    }
}
