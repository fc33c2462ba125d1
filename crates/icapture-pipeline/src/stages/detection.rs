use crate::queue::{BoundedQueue, Popped, PushOutcome};
use crate::sync::SyncedPair;
use crate::verify::{VerificationOutcome, Verifier};
use chrono::Utc;
use icapture_inference::{Detector, PlateReader};
use icapture_logging::LogThrottle;
use icapture_metrics::PipelineMetrics;
use icapture_shutdown::StopToken;
use icapture_storage::ViolationStore;
use icapture_types::{CandidateViolation, Clock, Detection, PlateRead};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 检测阶段：检测、识别、确认，确认后的违章写入结果队列
pub struct DetectionStage {
    pub frames: Arc<BoundedQueue<SyncedPair>>,
    pub results: Arc<BoundedQueue<CandidateViolation>>,
    pub detector: Arc<dyn Detector>,
    pub plate_reader: Arc<dyn PlateReader>,
    pub verifier: Verifier,
    /// 启动时从中恢复去重窗口内的车牌
    pub history: Option<Arc<dyn ViolationStore>>,
    pub clock: Arc<dyn Clock>,
    pub push_timeout: Duration,
    pub pop_timeout: Duration,
    pub sweep_interval: Duration,
    /// 停机时处理完帧队列中剩余的帧对
    pub drain: bool,
    pub stop: StopToken,
    pub metrics: Option<PipelineMetrics>,
}

/// 运行检测阶段，退出时关闭结果队列
pub async fn run_detection_stage(mut stage: DetectionStage) {
    info!(detector = stage.detector.name(), drain = stage.drain, "Detection stage started");
    stage.restore_history().await;

    let throttle = LogThrottle::default();
    let mut last_sweep = stage.clock.now();
    let mut processed = 0u64;

    loop {
        let stopping = stage.stop.is_stopped();
        if stopping && !stage.drain {
            let abandoned = stage.frames.len();
            if abandoned > 0 {
                warn!(abandoned, "Abandoning queued frame pairs");
            }
            break;
        }

        let popped = if stopping {
            stage.frames.pop_timeout(stage.pop_timeout).await
        } else {
            stage.frames.pop(stage.pop_timeout, &stage.stop).await
        };

        match popped {
            Popped::Item(pair) => {
                stage.process(pair, &throttle).await;
                processed += 1;
            }
            Popped::Closed => break,
            Popped::TimedOut | Popped::Stopped => {}
        }

        let now = stage.clock.now();
        if now.saturating_duration_since(last_sweep) >= stage.sweep_interval {
            stage.verifier.sweep();
            last_sweep = now;
        }
    }

    stage.results.close();
    let stats = stage.verifier.stats();
    info!(
        processed,
        emitted = stats.emitted,
        suppressed = stats.suppressed,
        "Detection stage stopped"
    );
}

impl DetectionStage {
    async fn restore_history(&mut self) {
        let Some(store) = self.history.take() else {
            return;
        };

        let now = Utc::now();
        let window = chrono::Duration::from_std(self.verifier.duplicate_window())
            .unwrap_or_else(|_| chrono::Duration::zero());

        match store.recent_plates(now - window).await {
            Ok(plates) => {
                let recent = plates
                    .into_iter()
                    .map(|(plate, at)| (plate, (now - at).to_std().unwrap_or_default()));
                let restored = self.verifier.restore_recent(recent);
                if restored > 0 {
                    info!(restored, "Restored recent violations for duplicate suppression");
                }
            }
            Err(e) => warn!(error = %e, "Failed to load recent violations, duplicate window starts empty"),
        }
    }

    async fn process(&mut self, pair: SyncedPair, throttle: &LogThrottle) {
        let started = Instant::now();

        let Some(wide) = pair.wide.as_ref() else {
            debug!("Plate-only pair, nothing to detect");
            return;
        };

        let detections = match self.detector.detect(wide).await {
            Ok(detections) => detections,
            Err(e) => {
                if throttle.allow("detector") {
                    warn!(
                        error = %e,
                        suppressed = throttle.suppressed("detector"),
                        "Detection failed, skipping pair"
                    );
                }
                return;
            }
        };

        if let (Some(top), Some(metrics)) = (Detection::top(&detections), &self.metrics) {
            metrics.record_detection(top.violation_type.as_str());
        }

        let plate_read = match (&pair.plate, detections.is_empty()) {
            (Some(plate), false) => match self.plate_reader.read(plate).await {
                Ok(read) => read,
                Err(e) => {
                    if throttle.allow("ocr") {
                        warn!(error = %e, "Plate read failed, continuing without plate");
                    }
                    PlateRead::unreadable()
                }
            },
            _ => PlateRead::unreadable(),
        };

        let outcome = self.verifier.evaluate(&pair, &detections, &plate_read);
        if let Some(metrics) = &self.metrics {
            metrics.record_verification(outcome.label());
        }

        if let VerificationOutcome::Emitted(candidate) = outcome {
            if plate_read.text.is_none() {
                info!(code = %candidate.code, "Plate unreadable, violation recorded with reduced evidence");
            }
            let pushed = self
                .results
                .push(*candidate, self.push_timeout, &self.stop)
                .await;
            match pushed {
                Ok(PushOutcome::Enqueued) => {}
                Ok(PushOutcome::DroppedOldest) => {
                    warn!("Result queue full, oldest violation dropped");
                }
                Err(candidate) => {
                    warn!(code = %candidate.code, "Result queue closed, violation lost");
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.observe_stage("detection", started.elapsed().as_secs_f64());
        }
    }
}
