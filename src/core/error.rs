//! 编排层错误类型
//!
//! 两类错误：单次工具调用内的错误（可恢复，转为 is_error 的 ToolResult 回喂模型），
//! 以及循环控制层的错误（迭代/续跑上限、模型调用失败、隔离运行时生命周期失败，直接终止本轮 chat）。

use std::path::PathBuf;

use thiserror::Error;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum HiveError {
    /// 命令已运行但退出码非 0
    #[error("command `{command}` exited with code {exit_code}:\n{output}")]
    ExecutionFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("execution timed out after {timeout_ms}ms: {command}")]
    ExecutionTimeout { command: String, timeout_ms: u64 },

    #[error("path not allowed: {} (allowed: {})", path.display(), display_paths(allowed_paths))]
    PathNotAllowed {
        path: PathBuf,
        allowed_paths: Vec<PathBuf>,
    },

    /// 隔离运行时无法启动或无法到达，本轮所有工具都无法执行
    #[error("isolated runtime {operation} failed: {reason}")]
    IsolatedRuntimeError { operation: String, reason: String },

    #[error("maximum iterations reached ({max})")]
    MaxIterationsReached { max: usize },

    #[error("maximum continuations exceeded ({count} > {max})")]
    MaxContinuationsExceeded { count: usize, max: usize },

    /// 进程内分发失败（未知工具、不支持的操作、能力模块报错或 panic）
    #[error("dispatch of `{tool_name}` failed: {reason}")]
    DispatchFailed { tool_name: String, reason: String },

    #[error("invalid input for `{tool}`: {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error("artifact {id} unavailable: {reason}")]
    ArtifactUnavailable { id: String, reason: String },

    #[error("model call failed: {0}")]
    ModelCall(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HiveError {
    /// 是否属于「单次工具调用」层面的错误：可恢复的错误转成错误结果交给模型处理，
    /// 其余错误终止当前 chat
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HiveError::ExecutionFailed { .. }
                | HiveError::ExecutionTimeout { .. }
                | HiveError::PathNotAllowed { .. }
                | HiveError::DispatchFailed { .. }
                | HiveError::InvalidInput { .. }
                | HiveError::ArtifactUnavailable { .. }
                | HiveError::Io(_)
        )
    }

    pub(crate) fn runtime(operation: &str, reason: impl Into<String>) -> Self {
        HiveError::IsolatedRuntimeError {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_level_errors_are_recoverable() {
        let err = HiveError::ExecutionTimeout {
            command: "sleep 10".to_string(),
            timeout_ms: 100,
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("timed out"));

        let err = HiveError::PathNotAllowed {
            path: PathBuf::from("/etc/passwd"),
            allowed_paths: vec![PathBuf::from("/work")],
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("/work"));
    }

    #[test]
    fn test_loop_level_errors_are_fatal() {
        assert!(!HiveError::MaxIterationsReached { max: 25 }.is_recoverable());
        assert!(!HiveError::MaxContinuationsExceeded { count: 10, max: 9 }.is_recoverable());
        assert!(!HiveError::runtime("start", "docker not found").is_recoverable());
        assert!(!HiveError::ModelCall("503".to_string()).is_recoverable());
        assert!(!HiveError::Cancelled.is_recoverable());
    }
}
