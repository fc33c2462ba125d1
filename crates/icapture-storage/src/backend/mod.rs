use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod local;

pub use local::LocalBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl BackendError {
    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        BackendError::Io {
            path: path.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// 存储后端抽象 trait
///
/// 路径均为相对后端根目录的 `/` 分隔路径
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// 写入文件（覆盖）
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// 追加写入
    async fn append(&self, path: &str, data: &[u8]) -> Result<()>;

    /// 读取文件
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// 检查文件是否存在
    async fn exists(&self, path: &str) -> Result<bool>;

    /// 获取后端类型
    fn backend_type(&self) -> &str;
}
