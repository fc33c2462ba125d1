use crate::buffer::CameraBuffer;
use icapture_config::SyncConfig;
use icapture_metrics::PipelineMetrics;
use icapture_shutdown::StopToken;
use icapture_types::{CameraRole, Clock, Frame};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::trace;

/// 一次同步产出的帧对，被检测阶段消费且仅消费一次
#[derive(Debug, Clone)]
pub struct SyncedPair {
    pub wide: Option<Frame>,
    pub plate: Option<Frame>,
    /// 参考帧的采集时间
    pub timestamp: Instant,
    pub has_both: bool,
}

impl SyncedPair {
    pub fn synchronized(wide: Frame, plate: Frame) -> Self {
        let timestamp = wide.timestamp.min(plate.timestamp);
        Self {
            wide: Some(wide),
            plate: Some(plate),
            timestamp,
            has_both: true,
        }
    }

    /// 只有一路帧的降级帧对
    pub fn single(frame: Frame) -> Self {
        let timestamp = frame.timestamp;
        let (wide, plate) = match frame.role {
            CameraRole::Wide => (Some(frame), None),
            CameraRole::Plate => (None, Some(frame)),
        };
        Self {
            wide,
            plate,
            timestamp,
            has_both: false,
        }
    }

    /// 两帧的时间差
    pub fn time_delta(&self) -> Option<Duration> {
        match (&self.wide, &self.plate) {
            (Some(w), Some(p)) => Some(w.time_distance(p.timestamp)),
            _ => None,
        }
    }

    pub fn low_light(&self) -> bool {
        self.wide.iter().chain(self.plate.iter()).any(|f| f.low_light)
    }
}

/// 同步器统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStats {
    pub pairs_emitted: u64,
    pub synchronized: u64,
    pub wide_only: u64,
    pub plate_only: u64,
    pub stale_dropped: u64,
    pub overflow_dropped: u64,
    pub empty_polls: u64,
    pub wide_buffered: usize,
    pub plate_buffered: usize,
}

impl SyncStats {
    /// 同步成功率
    pub fn sync_rate(&self) -> f64 {
        if self.pairs_emitted == 0 {
            return 0.0;
        }
        self.synchronized as f64 / self.pairs_emitted as f64
    }
}

/// 双摄像头帧同步器
///
/// 以两路缓冲中最早的待配对帧为参考，在另一路中找时间差不超过容差的最近帧。
/// 找不到时，参考帧等待满宽限期，或者另一路已经出现了比容差更晚的帧，
/// 就作为单路帧对输出。两路都为空时不输出，由调用方稍后再试。
pub struct FrameSynchronizer {
    wide: CameraBuffer,
    plate: CameraBuffer,
    tolerance: Duration,
    grace: Duration,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
    stats: SyncStats,
    stats_tx: watch::Sender<SyncStats>,
    metrics: Option<PipelineMetrics>,
}

impl FrameSynchronizer {
    pub fn new(config: &SyncConfig, clock: Arc<dyn Clock>) -> Self {
        let (stats_tx, _) = watch::channel(SyncStats::default());
        Self {
            wide: CameraBuffer::new(CameraRole::Wide, config.buffer_capacity, config.buffer_max_age()),
            plate: CameraBuffer::new(CameraRole::Plate, config.buffer_capacity, config.buffer_max_age()),
            tolerance: config.tolerance(),
            grace: config.grace().max(config.tolerance()),
            poll_interval: config.poll_interval(),
            clock,
            stats: SyncStats::default(),
            stats_tx,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 放入一帧
    pub fn insert(&mut self, frame: Frame) {
        let now = self.clock.now();
        let buffer = match frame.role {
            CameraRole::Wide => &mut self.wide,
            CameraRole::Plate => &mut self.plate,
        };
        let evicted = buffer.insert(frame, now);

        self.stats.stale_dropped += evicted.stale as u64;
        self.stats.overflow_dropped += evicted.overflow as u64;
        self.publish();
    }

    /// 尝试产出一个帧对
    pub fn try_pair(&mut self) -> Option<SyncedPair> {
        let now = self.clock.now();
        let stale = self.wide.evict_stale(now) + self.plate.evict_stale(now);
        self.stats.stale_dropped += stale as u64;

        let pair = self.match_oldest(now);
        match &pair {
            Some(p) => self.record(p),
            None if self.wide.is_empty() && self.plate.is_empty() => self.stats.empty_polls += 1,
            None => {}
        }

        if pair.is_some() || stale > 0 {
            self.publish();
        }
        pair
    }

    fn match_oldest(&mut self, now: Instant) -> Option<SyncedPair> {
        let reference_role = match (self.wide.oldest(), self.plate.oldest()) {
            (None, None) => return None,
            (Some(_), None) => CameraRole::Wide,
            (None, Some(_)) => CameraRole::Plate,
            (Some(w), Some(p)) if w.timestamp <= p.timestamp => CameraRole::Wide,
            (Some(_), Some(_)) => CameraRole::Plate,
        };

        let (own, other) = match reference_role {
            CameraRole::Wide => (&mut self.wide, &mut self.plate),
            CameraRole::Plate => (&mut self.plate, &mut self.wide),
        };
        let reference_ts = own.oldest()?.timestamp;

        if let Some(matched) = other.take_closest(reference_ts, self.tolerance) {
            let reference = own.pop_oldest()?;
            let (wide, plate) = match reference_role {
                CameraRole::Wide => (reference, matched),
                CameraRole::Plate => (matched, reference),
            };
            return Some(SyncedPair::synchronized(wide, plate));
        }

        let waited_out = now.saturating_duration_since(reference_ts) >= self.grace;
        let passed_by = other
            .newest()
            .map_or(false, |f| f.timestamp > reference_ts + self.tolerance);

        if waited_out || passed_by {
            trace!(role = %reference_role, waited_out, passed_by, "Emitting single-camera pair");
            return own.pop_oldest().map(SyncedPair::single);
        }
        None
    }

    /// 等待下一个帧对，停止信号触发时返回 `None`
    ///
    /// 没有可配对的帧时按轮询间隔休眠，不会空转。
    pub async fn next_pair(&mut self, stop: &StopToken) -> Option<SyncedPair> {
        loop {
            if stop.is_stopped() {
                return None;
            }
            if let Some(pair) = self.try_pair() {
                return Some(pair);
            }
            tokio::select! {
                _ = stop.stopped() => return None,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn stats(&self) -> SyncStats {
        let mut stats = self.stats.clone();
        stats.wide_buffered = self.wide.len();
        stats.plate_buffered = self.plate.len();
        stats
    }

    /// 订阅统计更新
    pub fn subscribe_stats(&self) -> watch::Receiver<SyncStats> {
        self.stats_tx.subscribe()
    }

    fn record(&mut self, pair: &SyncedPair) {
        self.stats.pairs_emitted += 1;
        let kind = if pair.has_both {
            self.stats.synchronized += 1;
            "synchronized"
        } else if pair.wide.is_some() {
            self.stats.wide_only += 1;
            "wide_only"
        } else {
            self.stats.plate_only += 1;
            "plate_only"
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_pair(kind);
            metrics.set_sync_rate(self.stats.sync_rate());
        }
    }

    fn publish(&self) {
        let stats = self.stats();
        if let Some(metrics) = &self.metrics {
            metrics.set_buffer_occupancy(CameraRole::Wide.as_str(), stats.wide_buffered);
            metrics.set_buffer_occupancy(CameraRole::Plate.as_str(), stats.plate_buffered);
        }
        self.stats_tx.send_replace(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use icapture_shutdown::SignalHandler;
    use icapture_types::ManualClock;

    fn sync_config() -> SyncConfig {
        SyncConfig {
            tolerance_ms: 100,
            grace_ms: 100,
            buffer_capacity: 30,
            buffer_max_age_ms: 2000,
            poll_interval_ms: 5,
        }
    }

    fn synchronizer(clock: &ManualClock) -> FrameSynchronizer {
        FrameSynchronizer::new(&sync_config(), Arc::new(clock.clone()))
    }

    fn frame(clock: &ManualClock, role: CameraRole, at_ms: u64, seq: u64) -> Frame {
        Frame::new(
            format!("CAM-{}", role),
            role,
            clock.at(Duration::from_millis(at_ms)),
            Bytes::from_static(b"jpeg"),
            120.0,
        )
        .with_sequence(seq)
    }

    #[test]
    fn test_pairs_within_tolerance() {
        let clock = ManualClock::new();
        let mut sync = synchronizer(&clock);
        clock.advance(Duration::from_millis(60));

        sync.insert(frame(&clock, CameraRole::Wide, 0, 1));
        sync.insert(frame(&clock, CameraRole::Plate, 50, 1));

        let pair = sync.try_pair().unwrap();
        assert!(pair.has_both);
        assert_eq!(pair.time_delta(), Some(Duration::from_millis(50)));
        assert_eq!(sync.stats().synchronized, 1);
        assert_eq!(sync.stats().wide_buffered, 0);
    }

    #[test]
    fn test_outside_tolerance_degrades_to_single() {
        let clock = ManualClock::new();
        let config = SyncConfig {
            grace_ms: 300,
            ..sync_config()
        };
        let mut sync = FrameSynchronizer::new(&config, Arc::new(clock.clone()));
        clock.advance(Duration::from_millis(160));

        sync.insert(frame(&clock, CameraRole::Wide, 0, 1));
        sync.insert(frame(&clock, CameraRole::Plate, 150, 1));

        // 车牌帧已超出容差，广角帧不必等满宽限期
        let first = sync.try_pair().unwrap();
        assert!(!first.has_both);
        assert!(first.wide.is_some());

        // 车牌帧年龄 10ms，还在宽限期内
        assert!(sync.try_pair().is_none());

        clock.advance(Duration::from_millis(300));
        let second = sync.try_pair().unwrap();
        assert!(second.plate.is_some() && second.wide.is_none());

        let stats = sync.stats();
        assert_eq!(stats.wide_only, 1);
        assert_eq!(stats.plate_only, 1);
        assert_eq!(stats.sync_rate(), 0.0);
    }

    #[test]
    fn test_waits_for_partner_within_grace() {
        let clock = ManualClock::new();
        let mut sync = synchronizer(&clock);

        sync.insert(frame(&clock, CameraRole::Wide, 0, 1));
        clock.advance(Duration::from_millis(40));
        assert!(sync.try_pair().is_none());

        sync.insert(frame(&clock, CameraRole::Plate, 40, 1));
        assert!(sync.try_pair().unwrap().has_both);
    }

    #[test]
    fn test_single_camera_after_grace() {
        let clock = ManualClock::new();
        let mut sync = synchronizer(&clock);

        sync.insert(frame(&clock, CameraRole::Wide, 0, 1));
        clock.advance(Duration::from_millis(99));
        assert!(sync.try_pair().is_none());

        clock.advance(Duration::from_millis(1));
        let pair = sync.try_pair().unwrap();
        assert!(!pair.has_both);
        assert!(pair.plate.is_none());
    }

    #[test]
    fn test_closest_partner_wins() {
        let clock = ManualClock::new();
        let mut sync = synchronizer(&clock);
        clock.advance(Duration::from_millis(200));

        sync.insert(frame(&clock, CameraRole::Plate, 10, 1));
        sync.insert(frame(&clock, CameraRole::Plate, 90, 2));
        sync.insert(frame(&clock, CameraRole::Wide, 80, 1));

        // 参考帧是最早的车牌帧 (10ms)，与广角帧 (80ms) 相差 70ms
        let pair = sync.try_pair().unwrap();
        assert_eq!(pair.plate.as_ref().unwrap().sequence, 1);
        assert_eq!(pair.wide.as_ref().unwrap().sequence, 1);

        // 剩下的车牌帧 (90ms) 已超过宽限期
        let rest = sync.try_pair().unwrap();
        assert_eq!(rest.plate.unwrap().sequence, 2);
        assert!(sync.try_pair().is_none());
    }

    #[test]
    fn test_empty_buffers_count_empty_polls() {
        let clock = ManualClock::new();
        let mut sync = synchronizer(&clock);

        assert!(sync.try_pair().is_none());
        assert!(sync.try_pair().is_none());
        assert_eq!(sync.stats().empty_polls, 2);
        assert_eq!(sync.stats().pairs_emitted, 0);
    }

    #[test]
    fn test_stale_frames_never_paired() {
        let clock = ManualClock::new();
        let mut sync = synchronizer(&clock);

        sync.insert(frame(&clock, CameraRole::Wide, 0, 1));
        clock.advance(Duration::from_millis(2500));
        sync.insert(frame(&clock, CameraRole::Plate, 2500, 1));

        // 广角帧已超龄，被淘汰，不会与 2.5s 后的车牌帧配对
        assert!(sync.try_pair().is_none());
        assert_eq!(sync.stats().stale_dropped, 1);
        assert_eq!(sync.stats().plate_buffered, 1);
    }

    #[test]
    fn test_stats_published() {
        let clock = ManualClock::new();
        let mut sync = synchronizer(&clock);
        let rx = sync.subscribe_stats();

        sync.insert(frame(&clock, CameraRole::Wide, 0, 1));
        sync.insert(frame(&clock, CameraRole::Plate, 0, 1));
        assert_eq!(rx.borrow().wide_buffered, 1);

        sync.try_pair().unwrap();
        let stats = rx.borrow().clone();
        assert_eq!(stats.pairs_emitted, 1);
        assert_eq!(stats.sync_rate(), 1.0);
        assert_eq!(stats.plate_buffered, 0);
    }

    #[tokio::test]
    async fn test_next_pair_polls_until_stopped() {
        let clock = ManualClock::new();
        let mut sync = synchronizer(&clock);
        let (handler, _) = SignalHandler::new();
        let token = handler.stop_token();

        sync.insert(frame(&clock, CameraRole::Wide, 0, 1));
        sync.insert(frame(&clock, CameraRole::Plate, 20, 1));
        assert!(sync.next_pair(&token).await.unwrap().has_both);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handler.trigger_shutdown();
        });
        assert!(sync.next_pair(&token).await.is_none());
        assert!(sync.stats().empty_polls >= 2);
        stopper.await.unwrap();
    }
}
