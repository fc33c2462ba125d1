use crate::device::CameraDevice;
use crate::{CameraError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// 通过摄像头 HTTP 快照接口取帧
pub struct HttpSnapshotDevice {
    url: String,
    client: reqwest::Client,
}

impl HttpSnapshotDevice {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl CameraDevice for HttpSnapshotDevice {
    async fn open(&mut self) -> Result<()> {
        // 无连接状态，探测一次确认可达
        let resp = self.client.head(&self.url).send().await?;
        if resp.status().is_server_error() {
            return Err(CameraError::Open(format!(
                "{}: status {}",
                self.url,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn grab(&mut self) -> Result<Bytes> {
        let resp = self.client.get(&self.url).send().await?;

        if !resp.status().is_success() {
            return Err(CameraError::Read(format!(
                "Snapshot HTTP error: {}",
                resp.status()
            )));
        }

        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(CameraError::Read("empty snapshot".to_string()));
        }
        Ok(bytes)
    }

    async fn close(&mut self) {}

    fn describe(&self) -> String {
        format!("http:{}", self.url)
    }

    fn self_paced(&self) -> bool {
        false
    }
}
