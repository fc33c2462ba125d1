use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 双摄像头配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CamerasConfig {
    pub wide: CameraConfig,
    pub plate: CameraConfig,
}

impl Default for CamerasConfig {
    fn default() -> Self {
        Self {
            wide: CameraConfig::new("CAM-WA-001", "rtsp://127.0.0.1:8554/wide"),
            plate: CameraConfig::new("CAM-PL-001", "rtsp://127.0.0.1:8554/plate"),
        }
    }
}

/// 视频源
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CameraSourceConfig {
    /// 网络流，由 ffmpeg 拉流
    Rtsp { url: String },
    /// 本地 USB 摄像头（v4l2 设备）
    Usb { device: String },
    /// 摄像头 HTTP 快照接口
    Http { url: String },
    /// 不启用该路摄像头
    Disabled,
}

impl CameraSourceConfig {
    pub fn is_disabled(&self) -> bool {
        matches!(self, CameraSourceConfig::Disabled)
    }
}

/// 单路摄像头配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    pub camera_id: String,
    pub location: String,
    pub source: CameraSourceConfig,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub read_timeout_ms: u64,
    /// 连续读取失败多少次后判定断线
    pub max_read_failures: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// 平均亮度低于该值时标记为低照度
    pub min_brightness: f32,
}

impl CameraConfig {
    pub fn new(camera_id: &str, url: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            source: CameraSourceConfig::Rtsp {
                url: url.to_string(),
            },
            ..Default::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    /// 采集间隔
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera_id: "CAM-001".to_string(),
            location: "Main Gate".to_string(),
            source: CameraSourceConfig::Disabled,
            fps: 15,
            width: 1280,
            height: 720,
            read_timeout_ms: 2000,
            max_read_failures: 3,
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
            min_brightness: 50.0,
        }
    }
}
