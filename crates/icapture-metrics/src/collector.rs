use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

/// 流水线指标收集器
#[derive(Clone)]
pub struct PipelineMetrics {
    // 采集指标
    frames_captured_total: CounterVec,
    low_light_frames_total: CounterVec,
    camera_reconnects_total: CounterVec,
    camera_healthy: GaugeVec,

    // 同步指标
    sync_pairs_total: CounterVec,
    sync_rate: Gauge,
    sync_buffer_occupancy: GaugeVec,

    // 队列指标
    queue_depth: GaugeVec,
    queue_dropped_total: CounterVec,

    // 检测与确认指标
    detections_total: CounterVec,
    verification_outcomes_total: CounterVec,

    // 持久化指标
    persistence_results_total: CounterVec,

    // 性能指标
    stage_duration: HistogramVec,

    registry: Registry,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let frames_captured_total = CounterVec::new(
            Opts::new("icapture_frames_captured_total", "Total number of frames captured"),
            &["camera"],
        )?;
        registry.register(Box::new(frames_captured_total.clone()))?;

        let low_light_frames_total = CounterVec::new(
            Opts::new(
                "icapture_low_light_frames_total",
                "Frames flagged below the minimum brightness",
            ),
            &["camera"],
        )?;
        registry.register(Box::new(low_light_frames_total.clone()))?;

        let camera_reconnects_total = CounterVec::new(
            Opts::new("icapture_camera_reconnects_total", "Camera reconnect attempts"),
            &["camera"],
        )?;
        registry.register(Box::new(camera_reconnects_total.clone()))?;

        let camera_healthy = GaugeVec::new(
            Opts::new("icapture_camera_healthy", "1 when the camera is delivering frames"),
            &["camera"],
        )?;
        registry.register(Box::new(camera_healthy.clone()))?;

        let sync_pairs_total = CounterVec::new(
            Opts::new("icapture_sync_pairs_total", "Frame pairs emitted by the synchronizer"),
            &["kind"],
        )?;
        registry.register(Box::new(sync_pairs_total.clone()))?;

        let sync_rate = Gauge::new(
            "icapture_sync_rate",
            "Fraction of emitted pairs carrying both frames",
        )?;
        registry.register(Box::new(sync_rate.clone()))?;

        let sync_buffer_occupancy = GaugeVec::new(
            Opts::new("icapture_sync_buffer_occupancy", "Frames held per camera buffer"),
            &["source"],
        )?;
        registry.register(Box::new(sync_buffer_occupancy.clone()))?;

        let queue_depth = GaugeVec::new(
            Opts::new("icapture_queue_depth", "Items waiting in a stage queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let queue_dropped_total = CounterVec::new(
            Opts::new(
                "icapture_queue_dropped_total",
                "Items dropped from a full stage queue",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(queue_dropped_total.clone()))?;

        let detections_total = CounterVec::new(
            Opts::new("icapture_detections_total", "Top detections by class"),
            &["violation_type"],
        )?;
        registry.register(Box::new(detections_total.clone()))?;

        let verification_outcomes_total = CounterVec::new(
            Opts::new(
                "icapture_verification_outcomes_total",
                "Verification decisions by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(verification_outcomes_total.clone()))?;

        let persistence_results_total = CounterVec::new(
            Opts::new("icapture_persistence_results_total", "Persistence attempts by result"),
            &["result"],
        )?;
        registry.register(Box::new(persistence_results_total.clone()))?;

        let stage_duration = HistogramVec::new(
            HistogramOpts::new("icapture_stage_duration_seconds", "Per-item stage latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["stage"],
        )?;
        registry.register(Box::new(stage_duration.clone()))?;

        Ok(Self {
            frames_captured_total,
            low_light_frames_total,
            camera_reconnects_total,
            camera_healthy,
            sync_pairs_total,
            sync_rate,
            sync_buffer_occupancy,
            queue_depth,
            queue_dropped_total,
            detections_total,
            verification_outcomes_total,
            persistence_results_total,
            stage_duration,
            registry,
        })
    }

    // 采集指标记录
    pub fn record_frame(&self, camera: &str, low_light: bool) {
        self.frames_captured_total.with_label_values(&[camera]).inc();
        if low_light {
            self.low_light_frames_total.with_label_values(&[camera]).inc();
        }
    }

    pub fn record_reconnect(&self, camera: &str) {
        self.camera_reconnects_total.with_label_values(&[camera]).inc();
    }

    pub fn set_camera_healthy(&self, camera: &str, healthy: bool) {
        self.camera_healthy
            .with_label_values(&[camera])
            .set(if healthy { 1.0 } else { 0.0 });
    }

    // 同步指标记录
    pub fn record_pair(&self, kind: &str) {
        self.sync_pairs_total.with_label_values(&[kind]).inc();
    }

    pub fn set_sync_rate(&self, rate: f64) {
        self.sync_rate.set(rate);
    }

    pub fn set_buffer_occupancy(&self, source: &str, frames: usize) {
        self.sync_buffer_occupancy
            .with_label_values(&[source])
            .set(frames as f64);
    }

    // 队列指标记录
    pub fn set_queue_depth(&self, queue: &str, depth: usize) {
        self.queue_depth.with_label_values(&[queue]).set(depth as f64);
    }

    pub fn record_queue_drop(&self, queue: &str) {
        self.queue_dropped_total.with_label_values(&[queue]).inc();
    }

    pub fn record_detection(&self, violation_type: &str) {
        self.detections_total
            .with_label_values(&[violation_type])
            .inc();
    }

    pub fn record_verification(&self, outcome: &str) {
        self.verification_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_persistence(&self, result: &str) {
        self.persistence_results_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn observe_stage(&self, stage: &str, seconds: f64) {
        self.stage_duration.with_label_values(&[stage]).observe(seconds);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // 导出指标
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
