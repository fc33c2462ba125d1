use icapture_types::{CameraRole, Frame};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 一次插入引起的淘汰数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evicted {
    pub stale: usize,
    pub overflow: usize,
}

/// 单路摄像头的帧缓冲
///
/// 按采集时间排序，容量和帧龄都有上限：超龄帧先淘汰，
/// 仍然满时丢弃最旧帧。
#[derive(Debug)]
pub struct CameraBuffer {
    role: CameraRole,
    frames: VecDeque<Frame>,
    capacity: usize,
    max_age: Duration,
}

impl CameraBuffer {
    pub fn new(role: CameraRole, capacity: usize, max_age: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            role,
            frames: VecDeque::with_capacity(capacity),
            capacity,
            max_age,
        }
    }

    pub fn role(&self) -> CameraRole {
        self.role
    }

    /// 插入一帧，返回淘汰情况
    pub fn insert(&mut self, frame: Frame, now: Instant) -> Evicted {
        let stale = self.evict_stale(now);

        let mut overflow = 0;
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
            overflow += 1;
        }

        // 同一路帧通常按序到达，乱序时插到对应位置
        let pos = self
            .frames
            .partition_point(|f| f.timestamp <= frame.timestamp);
        self.frames.insert(pos, frame);

        Evicted { stale, overflow }
    }

    /// 淘汰超龄帧
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.frames.front() {
            if front.age(now) <= self.max_age {
                break;
            }
            self.frames.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn oldest(&self) -> Option<&Frame> {
        self.frames.front()
    }

    pub fn newest(&self) -> Option<&Frame> {
        self.frames.back()
    }

    pub fn pop_oldest(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// 取出与 `target` 时间差不超过 `tolerance` 的最近一帧
    ///
    /// 时间差相同时取序号更大的帧。
    pub fn take_closest(&mut self, target: Instant, tolerance: Duration) -> Option<Frame> {
        let mut best: Option<(usize, Duration, u64)> = None;

        for (idx, frame) in self.frames.iter().enumerate() {
            let distance = frame.time_distance(target);
            if distance > tolerance {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, d, seq)) => distance < d || (distance == d && frame.sequence > seq),
            };
            if better {
                best = Some((idx, distance, frame.sequence));
            }
        }

        best.and_then(|(idx, _, _)| self.frames.remove(idx))
    }
}
