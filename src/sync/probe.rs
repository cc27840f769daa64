use std::sync::RwLock;
use std::time::{Duration, Instant};

type Probe<T> = Box<dyn Fn() -> T + Send + Sync>;

struct Cached<T> {
    value: Option<T>,
    expires: Instant,
}

/// 对昂贵或易变的外部探测结果做冷却期缓存
///
/// 冷却期内的调用直接返回缓存值（读锁），过期后在写锁内重新探测。
/// 多个调用方同时越过过期时间时，可能依次各自重新探测一次；
/// 缓存值只作为限速提示使用，这种重复是可以接受的。
pub struct CoalescingProbe<T> {
    cached: RwLock<Cached<T>>,
    cooldown: Duration,
    probe: Probe<T>,
}

impl<T: Clone> CoalescingProbe<T> {
    pub fn new<F>(probe: F, cooldown: Duration) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            cached: RwLock::new(Cached { value: None, expires: Instant::now() }),
            cooldown,
            probe: Box::new(probe),
        }
    }

    /// 返回缓存值，或者在冷却期结束后重新探测
    pub fn call(&self) -> T {
        if let Some(value) = self.try_cached() {
            return value;
        }

        let mut cached = self.cached.write().unwrap_or_else(|e| e.into_inner());
        let value = (self.probe)();
        cached.value = Some(value.clone());
        cached.expires = Instant::now() + self.cooldown;
        value
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn try_cached(&self) -> Option<T> {
        let cached = self.cached.read().unwrap_or_else(|e| e.into_inner());
        if Instant::now() < cached.expires { cached.value.clone() } else { None }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    fn counting_probe(cooldown: Duration) -> (Arc<AtomicUsize>, CoalescingProbe<usize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = {
            let calls = calls.clone();
            CoalescingProbe::new(move || calls.fetch_add(1, Ordering::SeqCst) + 1, cooldown)
        };
        (calls, probe)
    }

    #[test]
    fn test_probe_once_inside_window() {
        let (calls, probe) = counting_probe(Duration::from_secs(60));
        assert_eq!(probe.call(), 1);
        assert_eq!(probe.call(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_again_after_window() {
        let (calls, probe) = counting_probe(Duration::from_millis(10));
        assert_eq!(probe.call(), 1);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(probe.call(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_cooldown_always_probes() {
        let (calls, probe) = counting_probe(Duration::ZERO);
        for _ in 0..5 {
            probe.call();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_concurrent_callers_share_cache() {
        let (calls, probe) = counting_probe(Duration::from_secs(60));
        probe.call();
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        assert_eq!(probe.call(), 1);
                    }
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
