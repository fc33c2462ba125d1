// icapture-types: 双摄像头违章检测流水线的共享领域类型

pub mod backoff;
pub mod clock;
pub mod detection;
pub mod frame;
pub mod violation;

pub use backoff::ExponentialBackoff;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use detection::{BoundingBox, Detection, PlateRead, ViolationType};
pub use frame::{CameraRole, Frame};
pub use violation::{
    format_violation_code, generate_violation_code, CandidateViolation, ImageKind, ImageRef,
    TrackKey, ViolationId, ViolationRecord, VIOLATION_CODE_SUFFIXES,
};

pub use uuid::Uuid;
