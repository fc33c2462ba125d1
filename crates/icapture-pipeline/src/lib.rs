//! 双摄像头违章检测流水线
//!
//! 摄像头 → 同步器 → 帧队列 → 检测/识别/确认 → 结果队列 → 持久化。
//! 各阶段独立运行，下游变慢时由有界队列限流，不会阻塞采集。

pub mod buffer;
pub mod crop;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod stages;
pub mod sync;
pub mod verify;

pub use buffer::{CameraBuffer, Evicted};
pub use crop::crop_rider;
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineBuilder, RunningPipeline};
pub use queue::{BoundedQueue, Popped, PushOutcome};
pub use stages::{run_capture_stage, run_detection_stage, run_persistence_stage};
pub use sync::{FrameSynchronizer, SyncStats, SyncedPair};
pub use verify::{VerificationOutcome, VerificationStats, Verifier};
