// File: agent/src/monitors/rate_limit.rs
//
// Hard platform-probe rate limits from the monitor framework's design
// constraints. Every monitor that walks the IOKit device tree via
// system_profiler/ioreg holds one of these and checks it before invoking the
// platform binary.
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct ProbeGate {
    min_gap: Duration,
    last_invocation: Mutex<Option<Instant>>,
}

impl ProbeGate {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_invocation: Mutex::new(None),
        }
    }

    /// Returns true and records `now` if at least `min_gap` has elapsed since
    /// the last invocation; otherwise returns false without recording.
    pub async fn try_acquire(&self) -> bool {
        let mut last = self.last_invocation.lock().await;
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.min_gap => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// A small TTL cache for the last good probe response, shared with its gate
/// so a cycle that arrives before `min_gap` elapses can still serve fresh-ish
/// data instead of nothing.
pub struct TtlCache<T: Clone> {
    ttl: Duration,
    value: Mutex<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            value: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Option<T> {
        let guard = self.value.lock().await;
        match &*guard {
            Some((at, v)) if at.elapsed() < self.ttl => Some(v.clone()),
            _ => None,
        }
    }

    pub async fn set(&self, v: T) {
        *self.value.lock().await = Some((Instant::now(), v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_rejects_before_min_gap_elapses() {
        let gate = ProbeGate::new(Duration::from_millis(50));
        assert!(gate.try_acquire().await);
        assert!(!gate.try_acquire().await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(gate.try_acquire().await);
    }

    #[tokio::test]
    async fn ttl_cache_expires() {
        let cache = TtlCache::new(Duration::from_millis(30));
        cache.set(42).await;
        assert_eq!(cache.get().await, Some(42));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get().await, None);
    }
}
