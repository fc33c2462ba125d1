use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::camera::{CameraConfig, CamerasConfig};
use crate::inference::{DetectorBackend, DetectorConfig, OcrConfig};
use crate::pipeline::{
    PersistenceConfig, QueueConfig, ShutdownConfig, SyncConfig, VerificationConfig,
};

/// 全局配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub system: SystemConfig,
    pub cameras: CamerasConfig,
    pub sync: SyncConfig,
    pub queues: QueueConfig,
    pub verification: VerificationConfig,
    pub persistence: PersistenceConfig,
    pub storage: StorageConfig,
    pub detector: DetectorConfig,
    pub ocr: OcrConfig,
    pub notify: NotifyConfig,
    pub shutdown: ShutdownConfig,
    pub logging: LoggingConfig,
}

/// 系统配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    pub location: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "iCapture Helmet Violation Detection".to_string(),
            location: "Main Gate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data"),
        }
    }
}

/// 告警通知配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    /// info / warning / error / critical
    pub min_level: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            min_level: "warning".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl PipelineConfig {
    /// 启动前校验配置，任何错误都是致命的
    pub fn validate(&self) -> Result<()> {
        validate_camera("cameras.wide", &self.cameras.wide)?;
        validate_camera("cameras.plate", &self.cameras.plate)?;

        if self.cameras.wide.source.is_disabled() && self.cameras.plate.source.is_disabled() {
            return Err(anyhow!("at least one camera must be enabled"));
        }

        let sync = &self.sync;
        if sync.tolerance_ms == 0 {
            return Err(anyhow!("sync.tolerance_ms must be greater than 0"));
        }
        if sync.grace_ms < sync.tolerance_ms {
            return Err(anyhow!(
                "sync.grace_ms ({}) cannot be less than sync.tolerance_ms ({})",
                sync.grace_ms,
                sync.tolerance_ms
            ));
        }
        if sync.buffer_capacity == 0 {
            return Err(anyhow!("sync.buffer_capacity must be greater than 0"));
        }
        if sync.buffer_max_age_ms == 0 {
            return Err(anyhow!("sync.buffer_max_age_ms must be greater than 0"));
        }

        if self.queues.frame_capacity == 0 || self.queues.result_capacity == 0 {
            return Err(anyhow!("queue capacities must be greater than 0"));
        }

        let verification = &self.verification;
        if verification.consecutive_frames == 0 {
            return Err(anyhow!("verification.consecutive_frames must be greater than 0"));
        }
        check_unit_interval("verification.vision_confidence", verification.vision_confidence)?;
        check_unit_interval("verification.ocr_confidence", verification.ocr_confidence)?;
        if verification.max_violations_per_minute == 0 {
            return Err(anyhow!(
                "verification.max_violations_per_minute must be greater than 0"
            ));
        }

        let persistence = &self.persistence;
        if persistence.max_attempts == 0 {
            return Err(anyhow!("persistence.max_attempts must be greater than 0"));
        }
        if !(0.0..1.0).contains(&persistence.rider_crop_margin) {
            return Err(anyhow!(
                "persistence.rider_crop_margin must be in [0, 1), got {}",
                persistence.rider_crop_margin
            ));
        }
        if !(1..=100).contains(&persistence.jpeg_quality) {
            return Err(anyhow!(
                "persistence.jpeg_quality must be in 1..=100, got {}",
                persistence.jpeg_quality
            ));
        }

        validate_detector(&self.detector)?;
        if self.ocr.endpoint.trim().is_empty() {
            return Err(anyhow!("ocr.endpoint must not be empty"));
        }

        match self.notify.min_level.to_ascii_lowercase().as_str() {
            "info" | "warning" | "error" | "critical" => {}
            other => return Err(anyhow!("unknown notify.min_level: {}", other)),
        }

        Ok(())
    }
}

fn validate_camera(section: &str, camera: &CameraConfig) -> Result<()> {
    if camera.source.is_disabled() {
        return Ok(());
    }
    if camera.camera_id.trim().is_empty() {
        return Err(anyhow!("{}.camera_id must not be empty", section));
    }
    if camera.fps == 0 {
        return Err(anyhow!("{}.fps must be greater than 0", section));
    }
    if camera.reconnect_base_ms == 0 {
        return Err(anyhow!("{}.reconnect_base_ms must be greater than 0", section));
    }
    if camera.reconnect_base_ms > camera.reconnect_max_ms {
        return Err(anyhow!(
            "{}.reconnect_base_ms ({}) cannot be greater than reconnect_max_ms ({})",
            section,
            camera.reconnect_base_ms,
            camera.reconnect_max_ms
        ));
    }
    if camera.max_read_failures == 0 {
        return Err(anyhow!("{}.max_read_failures must be greater than 0", section));
    }
    if !(0.0..=255.0).contains(&camera.min_brightness) {
        return Err(anyhow!("{}.min_brightness must be in [0, 255]", section));
    }
    Ok(())
}

fn validate_detector(detector: &DetectorConfig) -> Result<()> {
    if detector.endpoint.trim().is_empty() {
        return Err(anyhow!("detector.endpoint must not be empty"));
    }
    if detector.backend == DetectorBackend::Cloud
        && detector.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
    {
        return Err(anyhow!("detector.api_key is required for the cloud backend"));
    }
    Ok(())
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be in [0, 1], got {}", name, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraSourceConfig;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.tolerance_ms, 100);
        assert_eq!(config.verification.consecutive_frames, 3);
        assert_eq!(config.persistence.max_attempts, 3);
    }

    #[test]
    fn test_rejects_out_of_range_confidence() {
        let mut config = PipelineConfig::default();
        config.verification.vision_confidence = 1.2;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.verification.ocr_confidence = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_thresholds() {
        let mut config = PipelineConfig::default();
        config.verification.consecutive_frames = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.queues.frame_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.persistence.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_grace_shorter_than_tolerance() {
        let mut config = PipelineConfig::default();
        config.sync.tolerance_ms = 200;
        config.sync.grace_ms = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("grace_ms"));
    }

    #[test]
    fn test_rejects_inverted_reconnect_backoff() {
        let mut config = PipelineConfig::default();
        config.cameras.plate.reconnect_base_ms = 60_000;
        assert!(config.validate().is_err());

        // 禁用的摄像头不参与校验
        config.cameras.plate.source = CameraSourceConfig::Disabled;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_all_cameras_disabled() {
        let mut config = PipelineConfig::default();
        config.cameras.wide.source = CameraSourceConfig::Disabled;
        config.cameras.plate.source = CameraSourceConfig::Disabled;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cloud_detector_requires_api_key() {
        let mut config = PipelineConfig::default();
        config.detector.backend = DetectorBackend::Cloud;
        assert!(config.validate().is_err());

        config.detector.api_key = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }
}
