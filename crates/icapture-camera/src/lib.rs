// icapture-camera: 摄像头接入与断线重连
//
// - 设备层：ffmpeg MJPEG 管道 / HTTP 快照
// - 源层：独立采集任务，指数退避重连，最新帧通过 watch 发布

pub mod device;
pub mod error;
pub mod ffmpeg;
pub mod http;
pub mod quality;
pub mod source;

pub use device::{build_device, CameraDevice};
pub use error::{CameraError, Result};
pub use ffmpeg::{FfmpegDevice, FfmpegInput, MjpegSplitter};
pub use http::HttpSnapshotDevice;
pub use quality::measure_brightness;
pub use source::{frame_channel, CameraSource, FrameReceiver, SourceState};
