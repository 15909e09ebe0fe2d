//! 会话与单次 chat 的配置

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::DEFAULT_MAX_CONCURRENT_TOOLS;
use crate::sandbox::DEFAULT_TIMEOUT_MS;
use crate::tools::DEFAULT_MAX_OUTPUT_BYTES;

/// 会话构造参数（对应配置文件的 [session] 段）
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// 工具结果循环 / 进程内循环的迭代上限
    pub max_iterations: usize,
    /// 续跑循环的上限
    pub max_continuations: usize,
    /// 单次工具调用超时（毫秒）
    pub timeout_ms: u64,
    /// 一轮内同时执行的工具调用数上限
    pub max_concurrency: usize,
    pub max_output_bytes: usize,
    /// 未设置时在系统临时目录下按会话 id 创建
    pub working_directory: Option<PathBuf>,
    /// 未设置时取第一个技能所在目录的上级，再退回工作目录
    pub skills_root: Option<PathBuf>,
    /// 为空时默认 {skills_root, working_directory}
    pub allowed_paths: Vec<PathBuf>,
    /// 显式关闭路径限制
    pub allow_all_paths: bool,
    /// 透传给隔离运行时启动器
    pub executor_config: HashMap<String, Value>,
    pub env: HashMap<String, String>,
    /// 追加在技能提示词之前的系统提示词
    pub system_prompt: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_continuations: 10,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_concurrency: DEFAULT_MAX_CONCURRENT_TOOLS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            working_directory: None,
            skills_root: None,
            allowed_paths: Vec::new(),
            allow_all_paths: false,
            executor_config: HashMap::new(),
            env: HashMap::new(),
            system_prompt: None,
        }
    }
}

impl SessionOptions {
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_continuations(mut self, max: usize) -> Self {
        self.max_continuations = max;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_skills_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.skills_root = Some(dir.into());
        self
    }

    pub fn with_allowed_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.allowed_paths = paths;
        self
    }

    /// 关闭路径白名单（本机执行可访问任意路径）
    pub fn allow_all_paths(mut self) -> Self {
        self.allow_all_paths = true;
        self
    }

    pub fn with_executor_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.executor_config.insert(key.into(), value);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// 单次 chat 的参数
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// 取消后当前轮以 Cancelled 失败
    pub cancel: Option<CancellationToken>,
}

impl ChatOptions {
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SessionOptions::default();
        assert_eq!(opts.max_iterations, 25);
        assert_eq!(opts.max_continuations, 10);
        assert_eq!(opts.timeout_ms, 30_000);
        assert!(opts.allowed_paths.is_empty());
        assert!(!opts.allow_all_paths);
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let opts: SessionOptions =
            serde_json::from_value(serde_json::json!({"max_iterations": 5, "env": {"A": "b"}})).unwrap();
        assert_eq!(opts.max_iterations, 5);
        assert_eq!(opts.max_continuations, 10);
        assert_eq!(opts.env.get("A").map(String::as_str), Some("b"));
    }
}
