use crate::backend::{BackendError, StorageBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use icapture_types::{
    format_violation_code, generate_violation_code, ImageKind, ImageRef, Uuid, ViolationId,
    ViolationRecord, VIOLATION_CODE_SUFFIXES,
};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const VIOLATIONS_DIR: &str = "violations";
const RECORDS_FILE: &str = "violations/records.jsonl";
const RANDOM_CODE_ATTEMPTS: usize = 16;

/// 违章存储错误：瞬时错误可重试，永久错误不可重试
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("permanent storage failure: {0}")]
    Permanent(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl From<BackendError> for StorageError {
    fn from(err: BackendError) -> Self {
        match &err {
            BackendError::InvalidPath(_) => StorageError::Permanent(err.to_string()),
            BackendError::Io { source, .. } => match source.kind() {
                ErrorKind::PermissionDenied
                | ErrorKind::InvalidInput
                | ErrorKind::InvalidData
                | ErrorKind::Unsupported => StorageError::Permanent(err.to_string()),
                _ => StorageError::Transient(err.to_string()),
            },
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Permanent(format!("record serialization failed: {}", err))
    }
}

/// 违章持久化接口
///
/// 所有写操作都按候选的 `uid` 幂等：同一候选重复调用不会产生重复数据，
/// 以便持久化阶段在瞬时失败后整体重试。
#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// 为候选分配唯一违章编号
    ///
    /// 编号未被占用时原样返回；已被其他违章占用时重新生成。
    /// 同一 `uid` 再次调用返回同一编号。
    async fn reserve_code(
        &self,
        uid: Uuid,
        code: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<String, StorageError>;

    /// 保存证据图片，返回引用
    async fn save_image(
        &self,
        code: &str,
        data: &[u8],
        kind: ImageKind,
    ) -> Result<ImageRef, StorageError>;

    /// 保存违章记录，返回记录 ID
    async fn save_violation(&self, record: &ViolationRecord) -> Result<ViolationId, StorageError>;

    /// 自 `since` 起记录过违章的车牌及其最近一次时间
    async fn recent_plates(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StorageError>;
}

#[derive(Default)]
struct RecordIndex {
    next_id: u64,
    records: usize,
    by_uid: HashMap<Uuid, ViolationId>,
    /// 编号 -> 占用者，包括已保存和已预留的
    owners: HashMap<String, Uuid>,
    reserved: HashMap<Uuid, String>,
    last_by_plate: HashMap<String, DateTime<Utc>>,
}

impl RecordIndex {
    fn track(&mut self, record: &ViolationRecord, id: ViolationId) {
        self.next_id = self.next_id.max(id.0 + 1);
        self.records += 1;
        if !record.uid.is_nil() {
            self.by_uid.insert(record.uid, id);
            self.reserved.insert(record.uid, record.code.clone());
        }
        self.owners.insert(record.code.clone(), record.uid);

        if let Some(plate) = &record.plate_number {
            let last = self
                .last_by_plate
                .entry(plate.clone())
                .or_insert(record.observed_at);
            if record.observed_at > *last {
                *last = record.observed_at;
            }
        }
    }

    fn is_free(&self, code: &str) -> bool {
        !self.owners.contains_key(code)
    }

    fn claim(&mut self, uid: Uuid, code: String) -> String {
        self.owners.insert(code.clone(), uid);
        self.reserved.insert(uid, code.clone());
        code
    }

    /// 先随机重试，再顺序扫描当天全部后缀
    fn free_code(&self, observed_at: DateTime<Utc>) -> Option<String> {
        (0..RANDOM_CODE_ATTEMPTS)
            .map(|_| generate_violation_code(observed_at))
            .find(|code| self.is_free(code))
            .or_else(|| {
                VIOLATION_CODE_SUFFIXES
                    .map(|suffix| format_violation_code(observed_at, suffix))
                    .find(|code| self.is_free(code))
            })
    }
}

/// 基于 [`StorageBackend`] 的违章存储
///
/// 图片写入 `violations/<kind>s/<code>_<kind>.jpg`，
/// 记录以 JSON Lines 追加到 `violations/records.jsonl`。
pub struct LocalViolationStore {
    backend: Arc<dyn StorageBackend>,
    index: Mutex<RecordIndex>,
}

impl LocalViolationStore {
    /// 打开存储，从已有记录恢复 ID 序列、编号占用和车牌最近违章时间
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, StorageError> {
        let mut index = RecordIndex {
            next_id: 1,
            ..Default::default()
        };

        if backend.exists(RECORDS_FILE).await? {
            let data = backend.read(RECORDS_FILE).await?;
            let text = String::from_utf8_lossy(&data);
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<ViolationRecord>(line) {
                    Ok(record) => {
                        if let Some(id) = record.id {
                            index.track(&record, id);
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping malformed violation record"),
                }
            }
        }

        info!(
            backend = backend.backend_type(),
            records = index.records,
            plates = index.last_by_plate.len(),
            next_id = index.next_id,
            "Violation store opened"
        );

        Ok(Self {
            backend,
            index: Mutex::new(index),
        })
    }

    pub fn image_path(code: &str, kind: ImageKind) -> String {
        format!("{}/{}s/{}_{}.jpg", VIOLATIONS_DIR, kind, code, kind)
    }

    pub fn records_path() -> &'static str {
        RECORDS_FILE
    }

    /// 已保存的记录数
    pub async fn record_count(&self) -> usize {
        self.index.lock().await.records
    }
}

#[async_trait]
impl ViolationStore for LocalViolationStore {
    async fn reserve_code(
        &self,
        uid: Uuid,
        code: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        let mut index = self.index.lock().await;

        if let Some(reserved) = index.reserved.get(&uid) {
            return Ok(reserved.clone());
        }
        if index.is_free(code) {
            return Ok(index.claim(uid, code.to_string()));
        }

        let fresh = index.free_code(observed_at).ok_or_else(|| {
            StorageError::Permanent(format!(
                "no free violation code left for {}",
                observed_at.format("%Y-%m-%d")
            ))
        })?;
        info!(uid = %uid, taken = %code, code = %fresh, "Violation code already in use, reassigned");

        Ok(index.claim(uid, fresh))
    }

    async fn save_image(
        &self,
        code: &str,
        data: &[u8],
        kind: ImageKind,
    ) -> Result<ImageRef, StorageError> {
        if data.is_empty() {
            return Err(StorageError::Permanent(format!("empty {} image", kind)));
        }

        let path = Self::image_path(code, kind);
        self.backend.write(&path, data).await?;
        debug!(code = %code, kind = %kind, path = %path, "Evidence image stored");

        Ok(ImageRef(path))
    }

    async fn save_violation(&self, record: &ViolationRecord) -> Result<ViolationId, StorageError> {
        // 持锁完成分配 ID 与追加，保证 ID 单调且不重复
        let mut index = self.index.lock().await;

        if let Some(id) = index.by_uid.get(&record.uid) {
            debug!(code = %record.code, id = %id, "Violation already stored");
            return Ok(*id);
        }
        if let Some(owner) = index.owners.get(&record.code) {
            if *owner != record.uid {
                return Err(StorageError::Permanent(format!(
                    "violation code {} belongs to another violation",
                    record.code
                )));
            }
        }

        let id = ViolationId(index.next_id);
        let mut stored = record.clone();
        stored.id = Some(id);

        let mut line = serde_json::to_vec(&stored)?;
        line.push(b'\n');
        self.backend.append(RECORDS_FILE, &line).await?;

        index.track(&stored, id);

        Ok(id)
    }

    async fn recent_plates(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StorageError> {
        let index = self.index.lock().await;
        Ok(index
            .last_by_plate
            .iter()
            .filter(|(_, at)| **at >= since)
            .map(|(plate, at)| (plate.clone(), *at))
            .collect())
    }
}
