//! 头盔检测与车牌识别
//!
//! 核心流水线只依赖 [`Detector`] / [`PlateReader`] 两个接口，
//! 具体后端在启动时通过 [`build_detector`] 一次性选定。

pub mod detector;
pub mod error;
pub mod ocr;
pub mod plate;

pub use detector::{build_detector, CloudDetector, Detector, LocalDetector};
pub use error::InferenceError;
pub use ocr::{HttpPlateReader, PlateReader};
pub use plate::{is_valid_plate, normalize_confidence, normalize_plate};
