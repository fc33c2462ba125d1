use crate::sync::SyncedPair;
use chrono::Utc;
use icapture_config::{LowConfidencePolicy, VerificationConfig};
use icapture_types::{
    generate_violation_code, CandidateViolation, Clock, Detection, PlateRead, TrackKey, Uuid,
    ViolationType,
};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// 单帧评估结果
#[derive(Debug, Clone)]
pub enum VerificationOutcome {
    /// 没有可计数的检测（无目标、合规、低置信度）
    Ignored,
    /// 计数中，尚未确认
    Observing { key: TrackKey, count: u32 },
    /// 确认并输出
    Emitted(Box<CandidateViolation>),
    /// 确认，但在去重窗口内，丢弃
    Suppressed { key: TrackKey },
    /// 确认，但超过每分钟上限，丢弃
    RateLimited { key: TrackKey },
}

impl VerificationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            VerificationOutcome::Ignored => "ignored",
            VerificationOutcome::Observing { .. } => "observing",
            VerificationOutcome::Emitted(_) => "emitted",
            VerificationOutcome::Suppressed { .. } => "suppressed",
            VerificationOutcome::RateLimited { .. } => "rate_limited",
        }
    }

    pub fn is_emitted(&self) -> bool {
        matches!(self, VerificationOutcome::Emitted(_))
    }
}

/// 确认统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerificationStats {
    pub evaluated: u64,
    pub ignored: u64,
    pub resets: u64,
    pub confirmed: u64,
    pub emitted: u64,
    pub suppressed: u64,
    pub rate_limited: u64,
    pub swept: u64,
    pub tracked: usize,
}

#[derive(Debug, Clone)]
struct TrackHistory {
    /// 从持久化记录恢复的键没有类型，首次观察时补上
    violation_type: Option<ViolationType>,
    consecutive: u32,
    last_seen: Instant,
    last_logged: Option<Instant>,
}

/// 违章确认与去重
///
/// 状态只属于检测阶段，单线程修改，不需要加锁。
/// 同一跟踪键必须按采集时间顺序送入。
pub struct Verifier {
    config: VerificationConfig,
    camera_location: String,
    clock: Arc<dyn Clock>,
    tracks: HashMap<TrackKey, TrackHistory>,
    emitted_at: VecDeque<Instant>,
    stats: VerificationStats,
    stats_tx: watch::Sender<VerificationStats>,
}

impl Verifier {
    pub fn new(
        config: VerificationConfig,
        camera_location: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (stats_tx, _) = watch::channel(VerificationStats::default());
        Self {
            config,
            camera_location: camera_location.into(),
            clock,
            tracks: HashMap::new(),
            emitted_at: VecDeque::new(),
            stats: VerificationStats::default(),
            stats_tx,
        }
    }

    /// 评估一个帧对的检测与识别结果
    pub fn evaluate(
        &mut self,
        pair: &SyncedPair,
        detections: &[Detection],
        plate: &PlateRead,
    ) -> VerificationOutcome {
        self.stats.evaluated += 1;
        let outcome = self.evaluate_inner(pair, detections, plate);

        match &outcome {
            VerificationOutcome::Ignored => self.stats.ignored += 1,
            VerificationOutcome::Observing { .. } => {}
            VerificationOutcome::Emitted(_) => self.stats.emitted += 1,
            VerificationOutcome::Suppressed { .. } => self.stats.suppressed += 1,
            VerificationOutcome::RateLimited { .. } => self.stats.rate_limited += 1,
        }
        self.publish();
        outcome
    }

    fn evaluate_inner(
        &mut self,
        pair: &SyncedPair,
        detections: &[Detection],
        plate: &PlateRead,
    ) -> VerificationOutcome {
        let Some(top) = Detection::top(detections) else {
            return VerificationOutcome::Ignored;
        };

        let plate_text = plate.readable_text(self.config.ocr_confidence);
        let key = match plate_text {
            Some(text) => TrackKey::Plate(text.to_string()),
            None => TrackKey::Unidentified(
                top.track_id
                    .clone()
                    .or_else(|| pair.wide.as_ref().map(|f| f.camera_id.clone()))
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
        };
        let at = pair.timestamp;

        // 低置信度：按策略清零或视为空档
        if top.confidence < self.config.vision_confidence {
            if self.config.low_confidence_policy == LowConfidencePolicy::Reset {
                self.reset(&key);
            }
            return VerificationOutcome::Ignored;
        }

        // 合规检测打断连续计数
        if !top.violation_type.is_violation() {
            self.reset(&key);
            if let Some(history) = self.tracks.get_mut(&key) {
                history.last_seen = at;
            }
            return VerificationOutcome::Ignored;
        }

        let idle = self.config.track_idle();
        let required = self.config.consecutive_frames.max(1);
        let history = self.tracks.entry(key.clone()).or_insert(TrackHistory {
            violation_type: Some(top.violation_type),
            consecutive: 0,
            last_seen: at,
            last_logged: None,
        });

        if at.saturating_duration_since(history.last_seen) > idle
            || history.violation_type != Some(top.violation_type)
        {
            history.consecutive = 0;
        }
        history.violation_type = Some(top.violation_type);
        history.consecutive += 1;
        history.last_seen = at;

        if history.consecutive < required {
            debug!(key = %key, count = history.consecutive, "Observing violation");
            return VerificationOutcome::Observing {
                key,
                count: history.consecutive,
            };
        }

        // 确认后重新计数
        history.consecutive = 0;
        self.stats.confirmed += 1;

        let dedupe = key.is_plate() || self.config.dedupe_unreadable;
        if dedupe {
            if let Some(logged) = history.last_logged {
                if at.saturating_duration_since(logged) < self.config.duplicate_window() {
                    debug!(key = %key, "Duplicate violation suppressed");
                    return VerificationOutcome::Suppressed { key };
                }
            }
        }

        while let Some(front) = self.emitted_at.front() {
            if at.saturating_duration_since(*front) < RATE_WINDOW {
                break;
            }
            self.emitted_at.pop_front();
        }
        if self.emitted_at.len() >= self.config.max_violations_per_minute as usize {
            warn!(
                key = %key,
                limit = self.config.max_violations_per_minute,
                "Violation rate limit reached, discarding"
            );
            return VerificationOutcome::RateLimited { key };
        }

        history.last_logged = Some(at);
        self.emitted_at.push_back(at);

        let candidate = self.build_candidate(key, top, plate, pair);
        info!(
            code = %candidate.code,
            violation = %candidate.violation_type,
            plate = ?candidate.plate_text,
            confidence = candidate.detection_confidence,
            "Violation confirmed"
        );
        VerificationOutcome::Emitted(Box::new(candidate))
    }

    fn build_candidate(
        &self,
        key: TrackKey,
        top: &Detection,
        plate: &PlateRead,
        pair: &SyncedPair,
    ) -> CandidateViolation {
        let observed_at = Utc::now();
        let camera_id = pair
            .wide
            .as_ref()
            .or(pair.plate.as_ref())
            .map(|f| f.camera_id.clone())
            .unwrap_or_default();

        CandidateViolation {
            uid: Uuid::new_v4(),
            code: generate_violation_code(observed_at),
            violation_type: top.violation_type,
            plate_text: key.plate_text().map(str::to_string),
            track_key: key,
            detection_confidence: top.confidence,
            ocr_confidence: plate.confidence,
            camera_location: self.camera_location.clone(),
            camera_id,
            observed_at,
            rider_image: pair.wide.as_ref().map(|f| f.image.clone()),
            rider_region: Some(top.region),
            plate_image: pair.plate.as_ref().map(|f| f.image.clone()),
            low_light: pair.low_light(),
        }
    }

    /// 恢复车牌的最近违章时间，`age` 为距今时长
    ///
    /// 重启后去重窗口仍然生效。已出窗口的车牌忽略，返回恢复的数量。
    pub fn restore_recent<I>(&mut self, recent: I) -> usize
    where
        I: IntoIterator<Item = (String, Duration)>,
    {
        let now = self.clock.now();
        let window = self.config.duplicate_window();
        let mut restored = 0;

        for (plate, age) in recent {
            if age >= window {
                continue;
            }
            let logged = now.checked_sub(age).unwrap_or(now);
            let history = self
                .tracks
                .entry(TrackKey::Plate(plate))
                .or_insert(TrackHistory {
                    violation_type: None,
                    consecutive: 0,
                    last_seen: logged,
                    last_logged: None,
                });
            if history.last_logged.map_or(true, |t| t < logged) {
                history.last_logged = Some(logged);
            }
            restored += 1;
        }

        if restored > 0 {
            self.publish();
        }
        restored
    }

    fn reset(&mut self, key: &TrackKey) {
        if let Some(history) = self.tracks.get_mut(key) {
            if history.consecutive > 0 {
                history.consecutive = 0;
                self.stats.resets += 1;
            }
        }
    }

    /// 清理空闲且已出去重窗口的跟踪键，返回清理数量
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now();
        let idle = self.config.track_idle();
        let window = self.config.duplicate_window();

        let before = self.tracks.len();
        self.tracks.retain(|_, h| {
            let active = now.saturating_duration_since(h.last_seen) <= idle;
            let in_window = h
                .last_logged
                .map_or(false, |t| now.saturating_duration_since(t) < window);
            active || in_window
        });
        let removed = before - self.tracks.len();

        if removed > 0 {
            self.stats.swept += removed as u64;
            debug!(removed, remaining = self.tracks.len(), "Swept idle tracks");
            self.publish();
        }
        removed
    }

    pub fn duplicate_window(&self) -> Duration {
        self.config.duplicate_window()
    }

    pub fn stats(&self) -> VerificationStats {
        let mut stats = self.stats.clone();
        stats.tracked = self.tracks.len();
        stats
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<VerificationStats> {
        self.stats_tx.subscribe()
    }

    /// 当前跟踪中的键
    pub fn tracked_keys(&self) -> Vec<TrackKey> {
        self.tracks.keys().cloned().collect()
    }

    fn publish(&self) {
        self.stats_tx.send_replace(self.stats());
    }
}
