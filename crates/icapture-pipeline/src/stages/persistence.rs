use crate::crop::crop_rider;
use crate::queue::{BoundedQueue, Popped};
use bytes::Bytes;
use icapture_config::PersistenceConfig;
use icapture_metrics::PipelineMetrics;
use icapture_notify::{NotifyManager, NotifyMessage};
use icapture_shutdown::StopToken;
use icapture_storage::{StorageError, ViolationStore};
use icapture_types::{
    CandidateViolation, ExponentialBackoff, ImageKind, ViolationId, ViolationRecord,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 持久化阶段：保存证据图片与违章记录，瞬时失败按指数退避重试
pub struct PersistenceStage {
    pub results: Arc<BoundedQueue<CandidateViolation>>,
    pub store: Arc<dyn ViolationStore>,
    pub notifier: NotifyManager,
    pub config: PersistenceConfig,
    pub pop_timeout: Duration,
    pub drain: bool,
    pub stop: StopToken,
    pub metrics: Option<PipelineMetrics>,
}

/// 运行持久化阶段，直到结果队列关闭并取空
pub async fn run_persistence_stage(stage: PersistenceStage) {
    info!(
        max_attempts = stage.config.max_attempts,
        "Persistence stage started"
    );
    let mut stored = 0u64;
    let mut failed = 0u64;

    loop {
        let stopping = stage.stop.is_stopped();
        if stopping && !stage.drain {
            let abandoned = stage.results.len();
            if abandoned > 0 {
                warn!(abandoned, "Abandoning queued violations");
            }
            break;
        }

        let popped = if stopping {
            stage.results.pop_timeout(stage.pop_timeout).await
        } else {
            stage.results.pop(stage.pop_timeout, &stage.stop).await
        };

        match popped {
            Popped::Item(candidate) => {
                if stage.persist(candidate).await {
                    stored += 1;
                } else {
                    failed += 1;
                }
            }
            Popped::Closed => break,
            Popped::TimedOut | Popped::Stopped => {}
        }
    }

    info!(stored, failed, "Persistence stage stopped");
}

impl PersistenceStage {
    /// 保存一条违章，失败时上报并返回 false，不影响后续处理
    async fn persist(&self, candidate: CandidateViolation) -> bool {
        let started = Instant::now();
        let rider_image = self.rider_image(&candidate).await;

        let max_attempts = self.config.max_attempts.max(1);
        let base = self.config.retry_base();
        let mut backoff = ExponentialBackoff::new(base, base.saturating_mul(1 << max_attempts.min(16)));
        let mut attempt = 0;

        let result = loop {
            attempt += 1;
            match self.store_once(&candidate, rider_image.as_ref()).await {
                Ok(stored) => break Ok(stored),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        code = %candidate.code,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient storage failure, retrying"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_persistence("retried");
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.observe_stage("persistence", started.elapsed().as_secs_f64());
        }

        match result {
            Ok((id, code)) => {
                info!(
                    id = %id,
                    code = %code,
                    violation = %candidate.violation_type,
                    plate = ?candidate.plate_text,
                    "Violation stored"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_persistence("stored");
                }
                true
            }
            Err(e) => {
                error!(code = %candidate.code, attempts = attempt, error = %e, "Failed to store violation");
                if let Some(metrics) = &self.metrics {
                    metrics.record_persistence("failed");
                }
                self.report_failure(&candidate, &e, attempt).await;
                false
            }
        }
    }

    /// 骑手截图，裁剪失败时退回整帧
    async fn rider_image(&self, candidate: &CandidateViolation) -> Option<Bytes> {
        let full = candidate.rider_image.clone()?;
        let Some(region) = candidate.rider_region else {
            return Some(full);
        };

        let margin = self.config.rider_crop_margin;
        let quality = self.config.jpeg_quality;
        let source = full.clone();
        let cropped =
            tokio::task::spawn_blocking(move || crop_rider(&source, &region, margin, quality)).await;

        match cropped {
            Ok(Ok(bytes)) => Some(bytes),
            Ok(Err(e)) => {
                debug!(code = %candidate.code, error = %e, "Rider crop failed, storing full frame");
                Some(full)
            }
            Err(e) => {
                warn!(code = %candidate.code, error = %e, "Rider crop task failed");
                Some(full)
            }
        }
    }

    /// 单次保存，按编号幂等，可整体重试
    /// 先向存储预留编号，图片和记录都用预留到的编号，避免覆盖其他违章的证据
    async fn store_once(
        &self,
        candidate: &CandidateViolation,
        rider_image: Option<&Bytes>,
    ) -> Result<(ViolationId, String), StorageError> {
        let code = self
            .store
            .reserve_code(candidate.uid, &candidate.code, candidate.observed_at)
            .await?;

        let rider_ref = match rider_image {
            Some(data) => Some(self.store.save_image(&code, data, ImageKind::Rider).await?),
            None => None,
        };

        let plate_ref = match &candidate.plate_image {
            Some(data) => Some(self.store.save_image(&code, data, ImageKind::Plate).await?),
            None => None,
        };

        let mut record = ViolationRecord::from_candidate(candidate, rider_ref, plate_ref);
        record.code = code.clone();
        let id = self.store.save_violation(&record).await?;

        Ok((id, code))
    }

    async fn report_failure(&self, candidate: &CandidateViolation, err: &StorageError, attempts: u32) {
        let message = NotifyMessage::error(
            "Violation persistence failed",
            format!(
                "Violation {} ({}) could not be stored after {} attempt(s): {}",
                candidate.code, candidate.violation_type, attempts, err
            ),
        )
        .with_metadata(json!({
            "code": candidate.code,
            "violation_type": candidate.violation_type.as_str(),
            "plate": candidate.plate_text,
            "camera_id": candidate.camera_id,
            "attempts": attempts,
            "transient": err.is_transient(),
        }));

        let delivered = self.notifier.broadcast(&message).await;
        debug!(code = %candidate.code, delivered, "Persistence failure reported");
    }
}
