// 根据配置组装流水线各组件，供 main.rs 和测试使用

use anyhow::{anyhow, Context, Result};
use icapture_camera::{build_device, CameraSource};
use icapture_config::{CameraConfig, NotifyConfig, PipelineConfig};
use icapture_inference::{build_detector, HttpPlateReader};
use icapture_metrics::PipelineMetrics;
use icapture_notify::{
    LogNotifier, NotifyChannel, NotifyLevel, NotifyManager, WebhookConfig, WebhookNotifier,
};
use icapture_pipeline::Pipeline;
use icapture_storage::{LocalBackend, LocalViolationStore};
use icapture_types::CameraRole;
use std::sync::Arc;
use tracing::info;

/// 创建通知管理器：日志通知始终注册，配置了 webhook 时一并注册
pub async fn build_notifier(config: &NotifyConfig) -> Result<NotifyManager> {
    let min_level: NotifyLevel = config
        .min_level
        .parse()
        .map_err(|e: String| anyhow!(e))?;

    let manager = NotifyManager::new(min_level);
    manager
        .register(NotifyChannel::Log, Box::new(LogNotifier))
        .await;

    if let Some(url) = config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        let webhook = WebhookNotifier::new(WebhookConfig::new(url))
            .context("Failed to create webhook notifier")?;
        manager
            .register(NotifyChannel::Webhook, Box::new(webhook))
            .await;
        info!(url = %url, "Webhook notifier registered");
    }

    Ok(manager)
}

/// 创建摄像头源，禁用的摄像头返回 `None`
pub fn build_camera(
    config: &CameraConfig,
    role: CameraRole,
    metrics: &PipelineMetrics,
) -> Result<Option<CameraSource>> {
    let Some(device) = build_device(config)
        .with_context(|| format!("Failed to create {} camera {}", role, config.camera_id))?
    else {
        info!(camera = %config.camera_id, role = %role, "Camera disabled");
        return Ok(None);
    };

    Ok(Some(
        CameraSource::new(config.clone(), role, device).with_metrics(metrics.clone()),
    ))
}

/// 按配置组装流水线（尚未启动）
pub async fn build_pipeline(config: &PipelineConfig, metrics: &PipelineMetrics) -> Result<Pipeline> {
    let detector = build_detector(&config.detector).context("Failed to create detector")?;
    let plate_reader =
        HttpPlateReader::new(&config.ocr).context("Failed to create plate reader")?;

    let backend = Arc::new(LocalBackend::new(config.storage.root_dir.clone()));
    let store = LocalViolationStore::open(backend)
        .await
        .context("Failed to open violation store")?;

    let notifier = build_notifier(&config.notify).await?;

    let mut builder = Pipeline::builder(config.clone())
        .detector(detector)
        .plate_reader(Arc::new(plate_reader))
        .store(Arc::new(store))
        .notifier(notifier)
        .metrics(metrics.clone());

    if let Some(camera) = build_camera(&config.cameras.wide, CameraRole::Wide, metrics)? {
        builder = builder.wide_camera(camera);
    }
    if let Some(camera) = build_camera(&config.cameras.plate, CameraRole::Plate, metrics)? {
        builder = builder.plate_camera(camera);
    }

    Ok(builder.build()?)
}
