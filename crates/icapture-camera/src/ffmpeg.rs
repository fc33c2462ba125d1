// ffmpeg MJPEG 管道采集
use crate::device::CameraDevice;
use crate::{CameraError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// 单帧上限，超过视为数据损坏
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// ffmpeg 输入
#[derive(Debug, Clone, PartialEq)]
pub enum FfmpegInput {
    Rtsp(String),
    /// v4l2 设备路径，如 `/dev/video0`
    V4l2(String),
}

/// 把 MJPEG 字节流按 SOI/EOI 标记切成独立 JPEG
#[derive(Debug)]
pub struct MjpegSplitter {
    buf: BytesMut,
    max_frame: usize,
}

impl MjpegSplitter {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(64 * 1024),
            max_frame,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 取出下一帧完整 JPEG
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let start = match find_marker(&self.buf, SOI, 0) {
            Some(pos) => pos,
            None => {
                // 保留末尾可能是半个标记的 0xFF
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let drop_len = self.buf.len() - keep;
                let _ = self.buf.split_to(drop_len);
                return None;
            }
        };
        if start > 0 {
            let _ = self.buf.split_to(start);
        }

        match find_marker(&self.buf, EOI, SOI.len()) {
            Some(end) => Some(self.buf.split_to(end + EOI.len()).freeze()),
            None => {
                if self.buf.len() > self.max_frame {
                    warn!(buffered = self.buf.len(), "MJPEG frame exceeds limit, discarding");
                    self.buf.clear();
                }
                None
            }
        }
    }
}

fn find_marker(buf: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if buf.len() < from + 2 {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

/// 通过 ffmpeg 子进程读取 RTSP/USB 摄像头，输出 MJPEG 到 stdout
pub struct FfmpegDevice {
    input: FfmpegInput,
    fps: u32,
    width: u32,
    height: u32,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    splitter: MjpegSplitter,
}

impl FfmpegDevice {
    pub fn new(input: FfmpegInput, fps: u32, width: u32, height: u32) -> Self {
        Self {
            input,
            fps: fps.max(1),
            width,
            height,
            child: None,
            stdout: None,
            splitter: MjpegSplitter::new(MAX_FRAME_BYTES),
        }
    }

    /// 组装 ffmpeg 参数
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        match &self.input {
            FfmpegInput::Rtsp(url) => {
                args.extend(["-rtsp_transport", "tcp", "-i"].map(String::from));
                args.push(url.clone());
            }
            FfmpegInput::V4l2(device) => {
                args.extend(["-f", "v4l2", "-framerate"].map(String::from));
                args.push(self.fps.to_string());
                args.push("-video_size".to_string());
                args.push(format!("{}x{}", self.width, self.height));
                args.push("-i".to_string());
                args.push(device.clone());
            }
        }

        args.push("-an".to_string());
        args.push("-vf".to_string());
        args.push(format!("fps={},scale={}:{}", self.fps, self.width, self.height));
        args.extend(
            [
                "-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "5", "-loglevel", "error", "-",
            ]
            .map(String::from),
        );
        args
    }

    fn input_label(&self) -> &str {
        match &self.input {
            FfmpegInput::Rtsp(url) => url,
            FfmpegInput::V4l2(device) => device,
        }
    }
}

#[async_trait]
impl CameraDevice for FfmpegDevice {
    async fn open(&mut self) -> Result<()> {
        self.close().await;

        let mut child = Command::new("ffmpeg")
            .args(self.build_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CameraError::Open(format!("{}: ffmpeg spawn failed: {}", self.input_label(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CameraError::Open(format!("{}: no stdout pipe", self.input_label())))?;

        info!(input = %self.input_label(), pid = ?child.id(), "ffmpeg capture started");
        self.child = Some(child);
        self.stdout = Some(stdout);
        Ok(())
    }

    async fn grab(&mut self) -> Result<Bytes> {
        let stdout = self.stdout.as_mut().ok_or(CameraError::Closed)?;
        let mut chunk = [0u8; 16 * 1024];

        loop {
            if let Some(frame) = self.splitter.next_frame() {
                return Ok(frame);
            }

            let n = stdout.read(&mut chunk).await?;
            if n == 0 {
                return Err(CameraError::Closed);
            }
            self.splitter.push(&chunk[..n]);
        }
    }

    async fn close(&mut self) {
        self.stdout = None;
        self.splitter = MjpegSplitter::new(MAX_FRAME_BYTES);

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(input = %self.input_label(), error = %e, "ffmpeg already exited");
            }
        }
    }

    fn describe(&self) -> String {
        format!("ffmpeg:{}", self.input_label())
    }
}
