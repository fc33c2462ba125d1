use async_trait::async_trait;
use bytes::Bytes;
use icapture_camera::{frame_channel, CameraDevice, CameraSource};
use icapture_config::PipelineConfig;
use icapture_inference::{Detector, InferenceError, PlateReader};
use icapture_notify::{
    NotifyChannel, NotifyError, NotifyLevel, NotifyManager, NotifyMessage, NotifyResult, Notifier,
};
use icapture_pipeline::stages::{run_persistence_stage, PersistenceStage};
use icapture_pipeline::{BoundedQueue, Pipeline, PipelineError};
use icapture_shutdown::SignalHandler;
use icapture_storage::{LocalBackend, LocalViolationStore, StorageError, ViolationStore};
use chrono::{DateTime, Utc};
use icapture_types::{
    BoundingBox, CameraRole, CandidateViolation, Detection, Frame, ImageKind, ImageRef, PlateRead,
    TrackKey, Uuid, ViolationId, ViolationRecord, ViolationType,
};
use image::codecs::jpeg::JpegEncoder;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

type FrameSender = tokio::sync::watch::Sender<Option<Frame>>;

fn jpeg(level: u8) -> Bytes {
    let img = image::GrayImage::from_pixel(64, 48, image::Luma([level]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 80))
        .unwrap();
    Bytes::from(buf)
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.cameras.wide.location = "North Gate".to_string();
    config.queues.push_timeout_ms = 50;
    config.queues.pop_timeout_ms = 20;
    config.persistence.retry_base_ms = 10;
    config.shutdown.grace_period_ms = 2000;
    config
}

/// 每帧都报告一名未戴头盔的骑手
struct NoHelmetDetector {
    delay: Duration,
    calls: AtomicU32,
}

impl NoHelmetDetector {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Detector for NoHelmetDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(vec![Detection::new(
            ViolationType::NoHelmet,
            0.9,
            BoundingBox::new(8.0, 8.0, 24.0, 24.0),
        )
        .with_track_id("7")])
    }

    fn name(&self) -> &str {
        "no-helmet"
    }
}

struct EmptyDetector;

#[async_trait]
impl Detector for EmptyDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "empty"
    }
}

struct FixedPlate(&'static str);

#[async_trait]
impl PlateReader for FixedPlate {
    async fn read(&self, _frame: &Frame) -> Result<PlateRead, InferenceError> {
        Ok(PlateRead::new(Some(self.0.to_string()), 0.92))
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<NotifyMessage>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &NotifyMessage) -> Result<NotifyResult, NotifyError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(NotifyResult::success())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// 前若干次保存记录失败的内存存储
struct FlakyStore {
    failures_left: AtomicU32,
    permanent: bool,
    attempts: AtomicU32,
    saved: Mutex<Vec<ViolationRecord>>,
}

impl FlakyStore {
    fn new(failures: u32, permanent: bool) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            permanent,
            attempts: AtomicU32::new(0),
            saved: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ViolationStore for FlakyStore {
    async fn reserve_code(
        &self,
        _uid: Uuid,
        code: &str,
        _observed_at: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        Ok(code.to_string())
    }

    async fn save_image(
        &self,
        code: &str,
        _data: &[u8],
        kind: ImageKind,
    ) -> Result<ImageRef, StorageError> {
        Ok(ImageRef(format!("mem/{}_{}.jpg", code, kind)))
    }

    async fn save_violation(&self, record: &ViolationRecord) -> Result<ViolationId, StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(if self.permanent {
                StorageError::Permanent("schema mismatch".to_string())
            } else {
                StorageError::Transient("disk busy".to_string())
            });
        }
        let mut saved = self.saved.lock().unwrap();
        saved.push(record.clone());
        Ok(ViolationId(saved.len() as u64))
    }

    async fn recent_plates(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StorageError> {
        let saved = self.saved.lock().unwrap();
        Ok(saved
            .iter()
            .filter(|r| r.observed_at >= since)
            .filter_map(|r| r.plate_number.clone().map(|plate| (plate, r.observed_at)))
            .collect())
    }
}

fn candidate(code: &str) -> CandidateViolation {
    CandidateViolation {
        uid: Uuid::new_v4(),
        code: code.to_string(),
        violation_type: ViolationType::NoHelmet,
        track_key: TrackKey::Plate("ABC1234".to_string()),
        plate_text: Some("ABC1234".to_string()),
        detection_confidence: 0.9,
        ocr_confidence: 0.8,
        camera_location: "North Gate".to_string(),
        camera_id: "CAM-WA-001".to_string(),
        observed_at: Utc::now(),
        rider_image: Some(jpeg(120)),
        rider_region: Some(BoundingBox::new(8.0, 8.0, 24.0, 24.0)),
        plate_image: Some(jpeg(90)),
        low_light: false,
    }
}

async fn run_persistence(
    store: Arc<dyn ViolationStore>,
    notifier: NotifyManager,
    candidates: Vec<CandidateViolation>,
) {
    let results = Arc::new(BoundedQueue::new("results", 4));
    for candidate in candidates {
        results
            .push_timeout(candidate, Duration::from_millis(10))
            .await
            .unwrap();
    }
    results.close();

    let (signal, _) = SignalHandler::new();
    let mut config = test_config().persistence;
    config.max_attempts = 3;
    config.retry_base_ms = 5;

    run_persistence_stage(PersistenceStage {
        results,
        store,
        notifier,
        config,
        pop_timeout: Duration::from_millis(20),
        drain: true,
        stop: signal.stop_token(),
        metrics: None,
    })
    .await;
}

/// 每 40ms 同时推送一对广角与车牌帧
async fn send_pairs(wide_tx: &FrameSender, plate_tx: &FrameSender, count: u64) {
    let wide_image = jpeg(140);
    let plate_image = jpeg(100);
    for seq in 0..count {
        let now = Instant::now();
        wide_tx.send_replace(Some(
            Frame::new("CAM-WA-001", CameraRole::Wide, now, wide_image.clone(), 140.0)
                .with_sequence(seq),
        ));
        plate_tx.send_replace(Some(
            Frame::new("CAM-PL-001", CameraRole::Plate, now, plate_image.clone(), 100.0)
                .with_sequence(seq),
        ));
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
}

fn plated_records(dir: &TempDir, plate: &str) -> Vec<ViolationRecord> {
    let path = dir.path().join(LocalViolationStore::records_path());
    let Ok(records) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    records
        .lines()
        .map(|line| serde_json::from_str::<ViolationRecord>(line).unwrap())
        .filter(|r| r.plate_number.as_deref() == Some(plate))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_violation_is_stored_once() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(LocalBackend::new(dir.path().to_path_buf()));
    let store = Arc::new(LocalViolationStore::open(backend).await.unwrap());

    let (wide_tx, wide_rx) = frame_channel();
    let (plate_tx, plate_rx) = frame_channel();

    let pipeline = Pipeline::builder(test_config())
        .wide_feed(wide_rx)
        .plate_feed(plate_rx)
        .detector(Arc::new(NoHelmetDetector::new(Duration::ZERO)))
        .plate_reader(Arc::new(FixedPlate("ABC1234")))
        .store(store.clone())
        .build()
        .unwrap();
    let running = pipeline.start().unwrap();

    send_pairs(&wide_tx, &plate_tx, 8).await;

    let deadline = Instant::now() + Duration::from_secs(3);
    while store.record_count().await == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let report = running.shutdown().await;
    assert!(report.is_clean(), "unclean shutdown: {:?}", report);

    let plated = plated_records(&dir, "ABC1234");

    // 同一车牌在去重窗口内只记录一次
    assert_eq!(plated.len(), 1);
    let record = &plated[0];
    assert_eq!(record.violation_type, ViolationType::NoHelmet);
    assert_eq!(record.camera_location, "North Gate");
    assert!(record.id.is_some());

    let rider = record.rider_image.as_ref().unwrap();
    assert!(dir.path().join(rider.as_str()).exists());
    let plate = record.plate_image.as_ref().unwrap();
    assert!(dir.path().join(plate.as_str()).exists());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let store = Arc::new(FlakyStore::new(2, false));
    let sink = RecordingNotifier::default();
    let notifier = NotifyManager::new(NotifyLevel::Info);
    notifier
        .register(NotifyChannel::Log, Box::new(sink.clone()))
        .await;

    run_persistence(store.clone(), notifier, vec![candidate("VL-20240301-0001")]).await;

    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.saved.lock().unwrap().len(), 1);
    assert!(sink.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_exhausted_retries_are_reported() {
    let store = Arc::new(FlakyStore::new(10, false));
    let sink = RecordingNotifier::default();
    let notifier = NotifyManager::new(NotifyLevel::Warning);
    notifier
        .register(NotifyChannel::Log, Box::new(sink.clone()))
        .await;

    run_persistence(store.clone(), notifier, vec![candidate("VL-20240301-0001")]).await;

    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    assert!(store.saved.lock().unwrap().is_empty());

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].level, NotifyLevel::Error);
    let metadata = sent[0].metadata.as_ref().unwrap();
    assert_eq!(metadata["code"], "VL-20240301-0001");
    assert_eq!(metadata["attempts"], 3);
    assert_eq!(metadata["transient"], true);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let store = Arc::new(FlakyStore::new(1, true));
    let sink = RecordingNotifier::default();
    let notifier = NotifyManager::new(NotifyLevel::Warning);
    notifier
        .register(NotifyChannel::Log, Box::new(sink.clone()))
        .await;

    run_persistence(store.clone(), notifier, vec![candidate("VL-20240301-0001")]).await;

    assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
    assert!(store.saved.lock().unwrap().is_empty());
    assert_eq!(sink.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_colliding_codes_keep_both_violations() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(LocalBackend::new(dir.path().to_path_buf()));
    let store = Arc::new(LocalViolationStore::open(backend).await.unwrap());

    let first = candidate("VL-20240301-0001");
    let mut second = candidate("VL-20240301-0001");
    second.plate_text = Some("XYZ9876".to_string());
    second.plate_image = Some(jpeg(30));

    run_persistence(
        store.clone(),
        NotifyManager::new(NotifyLevel::Warning),
        vec![first, second],
    )
    .await;

    assert_eq!(store.record_count().await, 2);
    let first = plated_records(&dir, "ABC1234").remove(0);
    let second = plated_records(&dir, "XYZ9876").remove(0);
    assert_eq!(first.code, "VL-20240301-0001");
    assert_ne!(second.code, first.code);
    assert_ne!(first.uid, second.uid);

    // 两条违章各自保留证据图片
    let read_plate = |record: &ViolationRecord| {
        let image = record.plate_image.as_ref().unwrap();
        std::fs::read(dir.path().join(image.as_str())).unwrap()
    };
    let first_plate = read_plate(&first);
    let second_plate = read_plate(&second);
    assert_eq!(first_plate, jpeg(90).to_vec());
    assert_eq!(second_plate, jpeg(30).to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_keeps_duplicate_window() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(LocalBackend::new(dir.path().to_path_buf()));

    for run in 0..2 {
        let store = Arc::new(LocalViolationStore::open(backend.clone()).await.unwrap());
        let (wide_tx, wide_rx) = frame_channel();
        let (plate_tx, plate_rx) = frame_channel();

        let running = Pipeline::builder(test_config())
            .wide_feed(wide_rx)
            .plate_feed(plate_rx)
            .detector(Arc::new(NoHelmetDetector::new(Duration::ZERO)))
            .plate_reader(Arc::new(FixedPlate("ABC1234")))
            .store(store.clone())
            .build()
            .unwrap()
            .start()
            .unwrap();

        send_pairs(&wide_tx, &plate_tx, 8).await;

        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let stats = running.verification_stats();
            let settled = if run == 0 {
                store.record_count().await > 0
            } else {
                stats.suppressed > 0
            };
            if settled || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let stats = running.verification_stats();
        let report = running.shutdown().await;
        assert!(report.is_clean(), "unclean shutdown: {:?}", report);
        if run == 1 {
            assert!(stats.suppressed > 0, "stats: {:?}", stats);
        }
    }

    // 重启后同一车牌仍在去重窗口内，不再记录
    assert_eq!(plated_records(&dir, "ABC1234").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_drains_queued_pairs() {
    let mut config = test_config();
    config.shutdown.drain = true;
    config.queues.frame_capacity = 4;
    config.verification.max_violations_per_minute = 100;

    let detector = Arc::new(NoHelmetDetector::new(Duration::from_millis(100)));
    let store = Arc::new(FlakyStore::new(0, false));
    let (wide_tx, wide_rx) = frame_channel();
    let running = Pipeline::builder(config)
        .wide_feed(wide_rx)
        .detector(detector.clone())
        .plate_reader(Arc::new(FixedPlate("ABC1234")))
        .store(store.clone())
        .build()
        .unwrap()
        .start()
        .unwrap();

    let image = jpeg(140);
    for seq in 0..10u64 {
        wide_tx.send_replace(Some(
            Frame::new("CAM-WA-001", CameraRole::Wide, Instant::now(), image.clone(), 140.0)
                .with_sequence(seq),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    let (frames_pending, _) = running.queue_depths();
    assert!(frames_pending > 0);
    let detected_before = detector.calls.load(Ordering::SeqCst);

    let report = running.shutdown().await;
    assert!(report.is_clean(), "unclean shutdown: {:?}", report);

    // 积压的帧对全部检测完，确认的违章全部落库
    let detected = detector.calls.load(Ordering::SeqCst);
    assert!(
        detected >= detected_before + frames_pending as u32,
        "detected {} of {} + {}",
        detected,
        detected_before,
        frames_pending
    );
    // 单路帧对没有车牌，每三帧确认一次
    assert_eq!(store.saved.lock().unwrap().len() as u32, detected / 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_abandons_queued_pairs_without_drain() {
    let mut config = test_config();
    config.shutdown.drain = false;
    config.queues.frame_capacity = 4;

    let (wide_tx, wide_rx) = frame_channel();
    let running = Pipeline::builder(config)
        .wide_feed(wide_rx)
        .detector(Arc::new(NoHelmetDetector::new(Duration::from_millis(200))))
        .plate_reader(Arc::new(FixedPlate("ABC1234")))
        .store(Arc::new(FlakyStore::new(0, false)))
        .build()
        .unwrap()
        .start()
        .unwrap();

    let image = jpeg(140);
    for seq in 0..10u64 {
        wide_tx.send_replace(Some(
            Frame::new("CAM-WA-001", CameraRole::Wide, Instant::now(), image.clone(), 140.0)
                .with_sequence(seq),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    // 等待宽限期输出单路帧对，使帧队列积压
    tokio::time::sleep(Duration::from_millis(300)).await;
    let (frames_pending, _) = running.queue_depths();
    assert!(frames_pending > 0);

    let started = Instant::now();
    let report = running.shutdown().await;
    assert!(report.is_clean(), "unclean shutdown: {:?}", report);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lost_plate_feed_degrades_to_wide_only() {
    let (wide_tx, wide_rx) = frame_channel();
    let (plate_tx, plate_rx) = frame_channel();

    let running = Pipeline::builder(test_config())
        .wide_feed(wide_rx)
        .plate_feed(plate_rx)
        .detector(Arc::new(EmptyDetector))
        .plate_reader(Arc::new(FixedPlate("ABC1234")))
        .store(Arc::new(FlakyStore::new(0, false)))
        .build()
        .unwrap()
        .start()
        .unwrap();

    // 车牌摄像头离线
    drop(plate_tx);

    let image = jpeg(140);
    for seq in 0..5u64 {
        wide_tx.send_replace(Some(
            Frame::new("CAM-WA-001", CameraRole::Wide, Instant::now(), image.clone(), 140.0)
                .with_sequence(seq),
        ));
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    let stats = running.sync_stats();
    assert!(stats.wide_only >= 3, "stats: {:?}", stats);
    assert_eq!(stats.synchronized, 0);
    assert_eq!(stats.plate_only, 0);

    let report = running.shutdown().await;
    assert!(report.is_clean());
}

/// 以固定帧率输出纯色 JPEG 的假设备
struct PacedDevice {
    image: Bytes,
    interval: Duration,
}

#[async_trait]
impl CameraDevice for PacedDevice {
    async fn open(&mut self) -> icapture_camera::Result<()> {
        Ok(())
    }

    async fn grab(&mut self) -> icapture_camera::Result<Bytes> {
        tokio::time::sleep(self.interval).await;
        Ok(self.image.clone())
    }

    async fn close(&mut self) {}

    fn describe(&self) -> String {
        "paced test device".to_string()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_camera_sources_are_started_and_stopped() {
    let config = test_config();
    let wide = CameraSource::new(
        config.cameras.wide.clone(),
        CameraRole::Wide,
        Box::new(PacedDevice {
            image: jpeg(140),
            interval: Duration::from_millis(40),
        }),
    );

    let running = Pipeline::builder(config)
        .wide_camera(wide)
        .detector(Arc::new(EmptyDetector))
        .plate_reader(Arc::new(FixedPlate("ABC1234")))
        .store(Arc::new(FlakyStore::new(0, false)))
        .build()
        .unwrap()
        .start()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(running.cameras().len(), 1);
    assert!(running.cameras()[0].is_healthy());
    assert!(running.sync_stats().wide_only > 0);

    let report = running.shutdown().await;
    assert!(report.is_clean(), "unclean shutdown: {:?}", report);
    assert!(report.completed.iter().any(|name| name == "camera-CAM-WA-001"));
}

#[test]
fn test_builder_requires_components() {
    let (_tx, rx) = frame_channel();
    let err = Pipeline::builder(test_config())
        .wide_feed(rx)
        .plate_reader(Arc::new(FixedPlate("ABC1234")))
        .store(Arc::new(FlakyStore::new(0, false)))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::MissingComponent("detector")));

    let err = Pipeline::builder(test_config())
        .detector(Arc::new(EmptyDetector))
        .plate_reader(Arc::new(FixedPlate("ABC1234")))
        .store(Arc::new(FlakyStore::new(0, false)))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::NoCamera));
}
