//! 工具并发池
//!
//! 单轮内所有工具调用并发执行，但同时在跑的调用数受 Semaphore 限制，避免负载下无界地派生任务。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 默认最大并发工具数
pub const DEFAULT_MAX_CONCURRENT_TOOLS: usize = 8;

/// 任务调度器：持有工具执行许可
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    tool_semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        let capacity = max_concurrent_tools.max(1);
        Self {
            tool_semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// 获取工具执行许可；信号量从不关闭，返回 None 时调用方直接执行
    pub async fn acquire_tool(&self) -> Option<OwnedSemaphorePermit> {
        self.tool_semaphore.clone().acquire_owned().await.ok()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.tool_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_TOOLS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_bounded() {
        let scheduler = TaskScheduler::new(2);
        let a = scheduler.acquire_tool().await;
        let _b = scheduler.acquire_tool().await;
        assert_eq!(scheduler.available(), 0);
        drop(a);
        assert_eq!(scheduler.available(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(TaskScheduler::new(0).capacity(), 1);
    }
}
