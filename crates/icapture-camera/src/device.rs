use crate::ffmpeg::{FfmpegDevice, FfmpegInput};
use crate::http::HttpSnapshotDevice;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use icapture_config::{CameraConfig, CameraSourceConfig};

/// 摄像头设备：打开后逐帧读取 JPEG
#[async_trait]
pub trait CameraDevice: Send {
    /// 打开（或重新打开）设备
    async fn open(&mut self) -> Result<()>;

    /// 读取下一帧 JPEG
    async fn grab(&mut self) -> Result<Bytes>;

    /// 释放设备
    async fn close(&mut self);

    /// 用于日志的设备描述
    fn describe(&self) -> String;

    /// 设备自身按帧率出帧；返回 false 时由采集循环按帧间隔轮询
    fn self_paced(&self) -> bool {
        true
    }
}

/// 根据配置创建设备，禁用的摄像头返回 `None`
pub fn build_device(config: &CameraConfig) -> Result<Option<Box<dyn CameraDevice>>> {
    let device: Box<dyn CameraDevice> = match &config.source {
        CameraSourceConfig::Disabled => return Ok(None),
        CameraSourceConfig::Rtsp { url } => Box::new(FfmpegDevice::new(
            FfmpegInput::Rtsp(url.clone()),
            config.fps,
            config.width,
            config.height,
        )),
        CameraSourceConfig::Usb { device } => Box::new(FfmpegDevice::new(
            FfmpegInput::V4l2(device.clone()),
            config.fps,
            config.width,
            config.height,
        )),
        CameraSourceConfig::Http { url } => {
            Box::new(HttpSnapshotDevice::new(url.clone(), config.read_timeout())?)
        }
    };
    Ok(Some(device))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_device_by_source_kind() {
        let mut config = CameraConfig::default();
        assert!(build_device(&config).unwrap().is_none());

        config.source = CameraSourceConfig::Rtsp {
            url: "rtsp://10.0.0.2/stream1".to_string(),
        };
        let device = build_device(&config).unwrap().unwrap();
        assert!(device.describe().contains("rtsp://10.0.0.2/stream1"));

        config.source = CameraSourceConfig::Http {
            url: "http://10.0.0.3/snapshot.jpg".to_string(),
        };
        let device = build_device(&config).unwrap().unwrap();
        assert!(device.describe().starts_with("http"));
    }
}
