use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct ThrottleEntry {
    last_emitted: Instant,
    suppressed: u64,
}

/// 按键限速的日志节流器：同一个键在间隔内只放行一次
///
/// 用于低照度、断线重连这类会持续刷屏的告警。
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    entries: Mutex<HashMap<String, ThrottleEntry>>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 判断是否应该输出
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get_mut(key) {
            Some(entry) if now.saturating_duration_since(entry.last_emitted) < self.interval => {
                entry.suppressed += 1;
                false
            }
            Some(entry) => {
                entry.last_emitted = now;
                entry.suppressed = 0;
                true
            }
            None => {
                entries.insert(
                    key.to_string(),
                    ThrottleEntry {
                        last_emitted: now,
                        suppressed: 0,
                    },
                );
                true
            }
        }
    }

    /// 自上次放行以来被抑制的次数
    pub fn suppressed(&self, key: &str) -> u64 {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map_or(0, |e| e.suppressed)
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_per_key() {
        let throttle = LogThrottle::new(Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(throttle.allow_at("CAM-WA-001", t0));
        assert!(!throttle.allow_at("CAM-WA-001", t0 + Duration::from_secs(1)));
        assert!(!throttle.allow_at("CAM-WA-001", t0 + Duration::from_secs(4)));
        assert_eq!(throttle.suppressed("CAM-WA-001"), 2);

        // 不同键互不影响
        assert!(throttle.allow_at("CAM-PL-001", t0 + Duration::from_secs(1)));

        assert!(throttle.allow_at("CAM-WA-001", t0 + Duration::from_secs(5)));
        assert_eq!(throttle.suppressed("CAM-WA-001"), 0);
    }

    #[test]
    fn test_zero_interval_always_allows() {
        let throttle = LogThrottle::new(Duration::ZERO);
        let t0 = Instant::now();
        for _ in 0..10 {
            assert!(throttle.allow_at("key", t0));
        }
    }
}
