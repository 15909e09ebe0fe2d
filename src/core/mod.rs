//! 核心层：错误分类与工具并发池

pub mod error;
pub mod task_scheduler;

pub use error::HiveError;
pub use task_scheduler::{TaskScheduler, DEFAULT_MAX_CONCURRENT_TOOLS};
