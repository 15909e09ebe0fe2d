//! 隔离运行时抽象：启动 / 在其中执行命令 / 销毁
//!
//! 核心只编排外部容器运行时的生命周期，不实现隔离原语本身。

use std::collections::HashMap;

use async_trait::async_trait;

use crate::core::HiveError;
use crate::sandbox::ExecutionContext;

/// 在运行时内执行的一条命令
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    /// 写入子进程 stdin 的内容（写文件时使用）
    pub stdin: Option<Vec<u8>>,
    pub env: HashMap<String, String>,
    pub workdir: Option<String>,
}

impl ExecRequest {
    /// `sh -c <script>`
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            argv: vec!["sh".to_string(), "-c".to_string(), script.into()],
            ..Default::default()
        }
    }

    pub fn with_stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 隔离运行时：每个会话最多一个，由会话独占
#[async_trait]
pub trait IsolatedRuntime: Send + Sync {
    /// 启动运行时，返回其标识；失败为 IsolatedRuntimeError
    async fn start(&self, ctx: &ExecutionContext, session_id: &str) -> Result<String, HiveError>;

    /// 运行一条命令直到退出；非 0 退出码不是错误，由调用方解释
    async fn exec(&self, runtime_id: &str, request: ExecRequest) -> Result<ExecOutput, HiveError>;

    async fn stop(&self, runtime_id: &str) -> Result<(), HiveError>;

    /// 技能根目录在运行时内的挂载点
    fn skills_mount(&self) -> &str {
        "/mnt/skills"
    }

    /// 工作目录在运行时内的挂载点
    fn workspace_mount(&self) -> &str {
        "/workspace"
    }
}
