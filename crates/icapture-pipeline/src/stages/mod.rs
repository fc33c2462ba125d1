// 流水线三个阶段，各自运行在独立任务中，通过有界队列衔接

pub mod capture;
pub mod detection;
pub mod persistence;

pub use capture::{run_capture_stage, CaptureStage};
pub use detection::{run_detection_stage, DetectionStage};
pub use persistence::{run_persistence_stage, PersistenceStage};
