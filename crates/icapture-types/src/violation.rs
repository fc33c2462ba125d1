use crate::detection::{BoundingBox, ViolationType};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 连续帧计数所用的跟踪键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TrackKey {
    /// 已识别的车牌号
    Plate(String),
    /// 车牌不可读时由调用方提供的短期跟踪标识
    Unidentified(String),
}

impl TrackKey {
    pub fn is_plate(&self) -> bool {
        matches!(self, TrackKey::Plate(_))
    }

    pub fn plate_text(&self) -> Option<&str> {
        match self {
            TrackKey::Plate(text) => Some(text),
            TrackKey::Unidentified(_) => None,
        }
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKey::Plate(text) => write!(f, "plate:{}", text),
            TrackKey::Unidentified(id) => write!(f, "track:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Rider,
    Plate,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Rider => "rider",
            ImageKind::Plate => "plate",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 存储返回的图片引用（路径或对象键）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViolationId(pub u64);

impl fmt::Display for ViolationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 违章编号后缀范围
pub const VIOLATION_CODE_SUFFIXES: std::ops::RangeInclusive<u32> = 1000..=9999;

/// 违章编号 `VL-YYYYMMDD-NNNN`，后缀随机
///
/// 编号只用于展示，同一天内可能重复，由存储在写入前分配唯一编号。
pub fn generate_violation_code(at: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(VIOLATION_CODE_SUFFIXES);
    format_violation_code(at, suffix)
}

pub fn format_violation_code(at: DateTime<Utc>, suffix: u32) -> String {
    format!("VL-{}-{}", at.format("%Y%m%d"), suffix)
}

/// 通过连续帧确认与去重后的违章候选，交给持久化阶段且仅一次
#[derive(Debug, Clone)]
pub struct CandidateViolation {
    /// 每个候选唯一，持久化重试按它幂等
    pub uid: Uuid,
    pub code: String,
    pub violation_type: ViolationType,
    pub track_key: TrackKey,
    pub plate_text: Option<String>,
    pub detection_confidence: f32,
    pub ocr_confidence: f32,
    pub camera_location: String,
    pub camera_id: String,
    pub observed_at: DateTime<Utc>,
    /// 广角帧原图（JPEG）
    pub rider_image: Option<Bytes>,
    /// 骑手检测框，持久化时用于裁剪
    pub rider_region: Option<BoundingBox>,
    /// 车牌帧原图（JPEG）
    pub plate_image: Option<Bytes>,
    pub low_light: bool,
}

impl CandidateViolation {
    pub fn has_plate(&self) -> bool {
        self.plate_text.is_some()
    }
}

/// 落盘的违章记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    #[serde(default)]
    pub id: Option<ViolationId>,
    #[serde(default)]
    pub uid: Uuid,
    pub code: String,
    pub violation_type: ViolationType,
    pub plate_number: Option<String>,
    pub detection_confidence: f32,
    pub ocr_confidence: f32,
    pub camera_location: String,
    pub camera_id: String,
    pub observed_at: DateTime<Utc>,
    pub rider_image: Option<ImageRef>,
    pub plate_image: Option<ImageRef>,
    pub notes: String,
    pub status: String,
}

impl ViolationRecord {
    pub fn from_candidate(
        candidate: &CandidateViolation,
        rider_image: Option<ImageRef>,
        plate_image: Option<ImageRef>,
    ) -> Self {
        let mut notes = format!(
            "{} detected at {} (confidence {:.2})",
            candidate.violation_type, candidate.camera_location, candidate.detection_confidence
        );
        if candidate.plate_text.is_none() {
            notes.push_str("; plate unreadable, reduced OCR evidence");
        }
        if candidate.low_light {
            notes.push_str("; low light");
        }

        Self {
            id: None,
            uid: candidate.uid,
            code: candidate.code.clone(),
            violation_type: candidate.violation_type,
            plate_number: candidate.plate_text.clone(),
            detection_confidence: candidate.detection_confidence,
            ocr_confidence: candidate.ocr_confidence,
            camera_location: candidate.camera_location.clone(),
            camera_id: candidate.camera_id.clone(),
            observed_at: candidate.observed_at,
            rider_image,
            plate_image,
            notes,
            status: "pending".to_string(),
        }
    }
}
