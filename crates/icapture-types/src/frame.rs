use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// 摄像头角色（广角看骑手，车牌机看号牌）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraRole {
    Wide,
    Plate,
}

impl CameraRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraRole::Wide => "wide",
            CameraRole::Plate => "plate",
        }
    }

    /// 另一路摄像头
    pub fn other(&self) -> CameraRole {
        match self {
            CameraRole::Wide => CameraRole::Plate,
            CameraRole::Plate => CameraRole::Wide,
        }
    }
}

impl fmt::Display for CameraRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 采集到的一帧（创建后不可变，图像数据为 JPEG 编码）
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: String,
    pub role: CameraRole,
    /// 单调采集时间
    pub timestamp: Instant,
    pub image: Bytes,
    /// 平均亮度 0-255
    pub brightness: f32,
    /// 亮度低于阈值，OCR 可能失败
    pub low_light: bool,
    /// 该摄像头内的递增序号
    pub sequence: u64,
}

impl Frame {
    pub fn new(
        camera_id: impl Into<String>,
        role: CameraRole,
        timestamp: Instant,
        image: Bytes,
        brightness: f32,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            role,
            timestamp,
            image,
            brightness,
            low_light: false,
            sequence: 0,
        }
    }

    pub fn with_low_light(mut self, low_light: bool) -> Self {
        self.low_light = low_light;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// 相对 `now` 的帧龄
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }

    /// 两帧采集时间之差的绝对值
    pub fn time_distance(&self, other: Instant) -> Duration {
        if self.timestamp >= other {
            self.timestamp - other
        } else {
            other - self.timestamp
        }
    }
}
