use icapture_camera::CameraError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Missing pipeline component: {0}")]
    MissingComponent(&'static str),

    #[error("No camera configured")]
    NoCamera,

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Detection region outside frame")]
    EmptyRegion,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
