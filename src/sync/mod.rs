mod affinity;
mod probe;

use std::fmt;

pub use affinity::ResourceAffinityPool;
pub use probe::CoalescingProbe;

/// 工作线程标识，由爬虫的线程池分配，而不是从操作系统线程 ID 推导
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}
