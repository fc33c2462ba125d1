use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera {0}")]
    Open(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Stream closed")]
    Closed,

    #[error("Timeout")]
    Timeout,

    #[error("Invalid image: {0}")]
    Decode(String),

    #[error("Camera already started: {0}")]
    AlreadyStarted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, CameraError>;
