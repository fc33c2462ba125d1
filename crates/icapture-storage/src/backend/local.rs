use super::{BackendError, Result, StorageBackend};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

/// 本地文件系统存储后端
#[derive(Clone)]
pub struct LocalBackend {
    /// 基础目录
    base_dir: PathBuf,
}

impl LocalBackend {
    /// 创建新的本地后端
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// 解析完整路径，拒绝跳出根目录的路径
    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        // 移除开头的斜杠，避免路径问题
        let clean_path = Path::new(path.trim_start_matches('/'));
        if clean_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(BackendError::InvalidPath(path.to_string()));
        }
        Ok(self.base_dir.join(clean_path))
    }

    /// 确保父目录存在
    async fn ensure_parent_dir(&self, path: &str, full_path: &Path) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::io(path, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.resolve_path(path)?;
        self.ensure_parent_dir(path, &full_path).await?;

        match fs::write(&full_path, data).await {
            Ok(_) => {
                debug!(path = %path, size = data.len(), "File written to local storage");
                Ok(())
            }
            Err(e) => {
                error!(path = %path, error = %e, "Failed to write file");
                Err(BackendError::io(path, e))
            }
        }
    }

    async fn append(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.resolve_path(path)?;
        self.ensure_parent_dir(path, &full_path).await?;

        let result: std::io::Result<()> = async {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&full_path)
                .await?;
            file.write_all(data).await?;
            file.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                debug!(path = %path, size = data.len(), "Data appended to local storage");
                Ok(())
            }
            Err(e) => {
                error!(path = %path, error = %e, "Failed to append file");
                Err(BackendError::io(path, e))
            }
        }
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        let full_path = self.resolve_path(path)?;

        match fs::read(&full_path).await {
            Ok(data) => {
                debug!(path = %path, size = data.len(), "File read from local storage");
                Ok(Bytes::from(data))
            }
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read file");
                Err(BackendError::io(path, e))
            }
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.resolve_path(path)?;
        Ok(full_path.exists())
    }

    fn backend_type(&self) -> &str {
        "local"
    }
}
