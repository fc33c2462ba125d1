pub mod camera;
pub mod global;
pub mod inference;
pub mod loader;
pub mod pipeline;

pub use camera::{CameraConfig, CameraSourceConfig, CamerasConfig};
pub use global::{
    LogFormat, LoggingConfig, NotifyConfig, PipelineConfig, StorageConfig, SystemConfig,
};
pub use inference::{DetectorBackend, DetectorConfig, OcrConfig};
pub use loader::ConfigLoader;
pub use pipeline::{
    LowConfidencePolicy, PersistenceConfig, QueueConfig, ShutdownConfig, SyncConfig,
    VerificationConfig,
};
