use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::WorkerId;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// 为每个工作线程惰性创建并缓存一个独占资源（例如一个数据库连接）
///
/// 同一个 `WorkerId` 总是拿到同一个实例，不同的 `WorkerId` 之间从不共享实例。
///
/// NOTE: 调用约定是每个 `WorkerId` 只被它所属的那一个工作线程顺序使用。
/// 如果两个调用方同时用同一个 ID 未命中缓存，双方都会调用工厂函数，
/// 后发布的实例会覆盖先发布的，先创建的那一个会被泄漏给它的调用方。
pub struct ResourceAffinityPool<T> {
    resources: RwLock<HashMap<WorkerId, Arc<T>>>,
    factory: Factory<T>,
}

impl<T> ResourceAffinityPool<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self { resources: RwLock::new(HashMap::new()), factory: Box::new(factory) }
    }

    /// 获取 `worker` 对应的资源，首次调用时创建
    pub fn get_resource(&self, worker: WorkerId) -> Arc<T> {
        {
            let resources = self.resources.read().unwrap_or_else(|e| e.into_inner());
            if let Some(res) = resources.get(&worker) {
                return res.clone();
            }
        }

        // 工厂函数可能很慢（例如打开连接），不能在持有写锁时调用
        let res = Arc::new((self.factory)());
        let mut resources = self.resources.write().unwrap_or_else(|e| e.into_inner());
        resources.insert(worker, res.clone());
        res
    }

    /// 已创建的资源数量
    pub fn len(&self) -> usize {
        self.resources.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn test_same_worker_same_instance() {
        let pool = ResourceAffinityPool::new(|| String::from("conn"));
        let a = pool.get_resource(WorkerId(1));
        let b = pool.get_resource(WorkerId(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_different_worker_different_instance() {
        let pool = ResourceAffinityPool::new(|| String::from("conn"));
        let a = pool.get_resource(WorkerId(1));
        let b = pool.get_resource(WorkerId(2));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_factory_called_once_per_worker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = {
            let calls = calls.clone();
            Arc::new(ResourceAffinityPool::new(move || calls.fetch_add(1, Ordering::SeqCst)))
        };

        // 每个线程只使用自己的 ID，符合调用约定
        thread::scope(|s| {
            for i in 0..4 {
                let pool = pool.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        pool.get_resource(WorkerId(i));
                    }
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(pool.len(), 4);
    }
}
