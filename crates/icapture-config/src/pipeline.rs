use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 帧同步配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 两路帧时间戳允许的最大差值
    pub tolerance_ms: u64,
    /// 等待另一路匹配帧的宽限期，超时后输出单路降级帧对
    pub grace_ms: u64,
    pub buffer_capacity: usize,
    pub buffer_max_age_ms: u64,
    /// 两路缓冲都为空时的轮询间隔
    pub poll_interval_ms: u64,
}

impl SyncConfig {
    pub fn tolerance(&self) -> Duration {
        Duration::from_millis(self.tolerance_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn buffer_max_age(&self) -> Duration {
        Duration::from_millis(self.buffer_max_age_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: 100,
            grace_ms: 100,
            buffer_capacity: 30,
            buffer_max_age_ms: 2000,
            poll_interval_ms: 10,
        }
    }
}

/// 阶段间队列配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub frame_capacity: usize,
    pub result_capacity: usize,
    /// 队列满时阻塞等待的上限，超时后丢弃最旧元素
    pub push_timeout_ms: u64,
    pub pop_timeout_ms: u64,
}

impl QueueConfig {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            frame_capacity: 16,
            result_capacity: 16,
            push_timeout_ms: 200,
            pop_timeout_ms: 100,
        }
    }
}

/// 低置信度帧对连续计数的影响
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LowConfidencePolicy {
    /// 计数清零
    #[default]
    Reset,
    /// 视为空档帧，计数保持不变
    Gap,
}

/// 违章确认与去重配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// 连续多少帧判定为同一违章后确认
    pub consecutive_frames: u32,
    pub duplicate_window_secs: u64,
    pub vision_confidence: f32,
    pub ocr_confidence: f32,
    pub low_confidence_policy: LowConfidencePolicy,
    /// 跟踪键空闲超过该时长后计数清零
    pub track_idle_secs: u64,
    /// 车牌不可读的违章是否也参与去重
    pub dedupe_unreadable: bool,
    /// 任意 60 秒内最多输出的违章数
    pub max_violations_per_minute: u32,
    pub sweep_interval_secs: u64,
}

impl VerificationConfig {
    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window_secs)
    }

    pub fn track_idle(&self) -> Duration {
        Duration::from_secs(self.track_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            consecutive_frames: 3,
            duplicate_window_secs: 60,
            vision_confidence: 0.6,
            ocr_confidence: 0.5,
            low_confidence_policy: LowConfidencePolicy::Reset,
            track_idle_secs: 5,
            dedupe_unreadable: false,
            max_violations_per_minute: 10,
            sweep_interval_secs: 1,
        }
    }
}

/// 持久化配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    /// 骑手截图在检测框四周外扩的比例
    pub rider_crop_margin: f32,
    pub jpeg_quality: u8,
}

impl PersistenceConfig {
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_ms: 500,
            rider_crop_margin: 0.1,
            jpeg_quality: 85,
        }
    }
}

/// 停机配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// 停机时是否处理完队列中剩余的数据
    pub drain: bool,
    pub grace_period_ms: u64,
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain: true,
            grace_period_ms: 5000,
        }
    }
}
