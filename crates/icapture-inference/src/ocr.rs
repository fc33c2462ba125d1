use crate::error::InferenceError;
use crate::plate::{is_valid_plate, normalize_confidence, normalize_plate};
use async_trait::async_trait;
use icapture_config::OcrConfig;
use icapture_types::{Frame, PlateRead};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::debug;

/// 车牌识别
#[async_trait]
pub trait PlateReader: Send + Sync {
    /// 识别车牌帧，读不出时返回文本为空的结果而不是错误
    async fn read(&self, frame: &Frame) -> Result<PlateRead, InferenceError>;
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    confidence: f32,
}

/// 调用 HTTP OCR 服务的车牌识别器
pub struct HttpPlateReader {
    endpoint: String,
    require_format: bool,
    client: reqwest::Client,
}

impl HttpPlateReader {
    pub fn new(config: &OcrConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            require_format: config.require_plate_format,
            client,
        })
    }

    fn interpret(&self, response: OcrResponse) -> PlateRead {
        let confidence = normalize_confidence(response.confidence);
        let text = response.text.as_deref().and_then(normalize_plate);

        match text {
            Some(text) if self.require_format && !is_valid_plate(&text) => {
                debug!(plate = %text, "OCR text does not look like a plate");
                PlateRead::new(None, confidence)
            }
            text => PlateRead::new(text, confidence),
        }
    }
}

#[async_trait]
impl PlateReader for HttpPlateReader {
    async fn read(&self, frame: &Frame) -> Result<PlateRead, InferenceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "image/jpeg")
            .body(frame.image.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        Ok(self.interpret(parsed))
    }
}
