use crate::error::InferenceError;
use crate::plate::normalize_confidence;
use async_trait::async_trait;
use bytes::Bytes;
use icapture_config::{DetectorBackend, DetectorConfig};
use icapture_types::{BoundingBox, Detection, Frame, ViolationType};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// 头盔检测器
#[async_trait]
pub trait Detector: Send + Sync {
    /// 检测一帧，返回所有目标（可能为空）
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError>;

    /// 后端名称
    fn name(&self) -> &str;
}

/// 按配置创建检测器
pub fn build_detector(config: &DetectorConfig) -> Result<Arc<dyn Detector>, InferenceError> {
    let detector: Arc<dyn Detector> = match config.backend {
        DetectorBackend::Local => Arc::new(LocalDetector::new(config)?),
        DetectorBackend::Cloud => Arc::new(CloudDetector::new(config)?),
    };
    info!(backend = detector.name(), endpoint = %config.endpoint, "Detector ready");
    Ok(detector)
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    class: String,
    confidence: f32,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    #[serde(default)]
    tracker_id: Option<serde_json::Value>,
}

/// 解析推理服务的预测结果，未知类别被忽略
fn parse_predictions(response: PredictionResponse) -> Vec<Detection> {
    response
        .predictions
        .into_iter()
        .filter_map(|p| {
            let violation_type: ViolationType = match p.class.parse() {
                Ok(t) => t,
                Err(_) => {
                    debug!(class = %p.class, "Ignoring unknown detection class");
                    return None;
                }
            };

            let region = BoundingBox::from_center(p.x, p.y, p.width, p.height);
            let detection =
                Detection::new(violation_type, normalize_confidence(p.confidence), region);

            Some(match p.tracker_id {
                Some(serde_json::Value::String(id)) => detection.with_track_id(id),
                Some(serde_json::Value::Number(id)) => detection.with_track_id(id.to_string()),
                _ => detection,
            })
        })
        .collect()
}

async fn post_image(
    request: reqwest::RequestBuilder,
    image: Bytes,
) -> Result<Vec<Detection>, InferenceError> {
    let response = request
        .header(CONTENT_TYPE, "image/jpeg")
        .body(image)
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

    let parsed: PredictionResponse = response
        .json()
        .await
        .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;
    Ok(parse_predictions(parsed))
}

/// 自建推理服务
pub struct LocalDetector {
    endpoint: String,
    client: reqwest::Client,
}

impl LocalDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }
}

#[async_trait]
impl Detector for LocalDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        post_image(self.client.post(&self.endpoint), frame.image.clone()).await
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// 托管推理 API，API key 通过查询参数传递
pub struct CloudDetector {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl CloudDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, InferenceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| InferenceError::Config("cloud detector requires api_key".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Detector for CloudDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let request = self
            .client
            .post(&self.endpoint)
            .query(&[("api_key", self.api_key.as_str())]);
        post_image(request, frame.image.clone()).await
    }

    fn name(&self) -> &str {
        "cloud"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_predictions() {
        let response: PredictionResponse = serde_json::from_str(
            r#"{
                "time": 0.04,
                "predictions": [
                    {"class": "no_helmet", "confidence": 0.91, "x": 100, "y": 80, "width": 40, "height": 60, "tracker_id": 7},
                    {"class": "with_helmet", "confidence": 0.55, "x": 300, "y": 90, "width": 40, "height": 60},
                    {"class": "motorcycle", "confidence": 0.99, "x": 10, "y": 10, "width": 5, "height": 5}
                ]
            }"#,
        )
        .unwrap();

        let detections = parse_predictions(response);
        assert_eq!(detections.len(), 2);

        let first = &detections[0];
        assert_eq!(first.violation_type, ViolationType::NoHelmet);
        assert_eq!(first.track_id.as_deref(), Some("7"));
        assert_eq!(first.region, BoundingBox::new(80.0, 50.0, 40.0, 60.0));

        assert_eq!(detections[1].violation_type, ViolationType::Compliant);
        assert!(detections[1].track_id.is_none());
    }

    #[test]
    fn test_empty_response() {
        let response: PredictionResponse = serde_json::from_str("{}").unwrap();
        assert!(parse_predictions(response).is_empty());
    }

    #[test]
    fn test_backend_selection() {
        let local = build_detector(&DetectorConfig::default()).unwrap();
        assert_eq!(local.name(), "local");

        let mut cloud = DetectorConfig {
            backend: DetectorBackend::Cloud,
            ..Default::default()
        };
        assert!(matches!(
            build_detector(&cloud),
            Err(InferenceError::Config(_))
        ));

        cloud.api_key = Some("secret".to_string());
        assert_eq!(build_detector(&cloud).unwrap().name(), "cloud");
    }
}
