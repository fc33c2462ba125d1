use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    /// 自建推理服务
    #[default]
    Local,
    /// 托管推理 API
    Cloud,
}

/// 头盔检测器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub backend: DetectorBackend,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl DetectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: DetectorBackend::Local,
            endpoint: "http://127.0.0.1:9001/helmet-detection/1".to_string(),
            api_key: None,
            timeout_ms: 5000,
        }
    }
}

/// 车牌识别配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OcrConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
    /// 不符合车牌格式的识别结果按不可读处理
    pub require_plate_format: bool,
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9002/ocr/plate".to_string(),
            timeout_ms: 5000,
            require_plate_format: false,
        }
    }
}
