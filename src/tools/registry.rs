//! 工具宿主与按名分发
//!
//! ToolHost 是执行四类工具的地方（本机或隔离运行时）；HostDispatch 按工具名
//! （bash_tool / view / create_file / str_replace）解析出操作类型与类型化输入，再交给宿主执行。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::HiveError;
use crate::sandbox::ExecutionContext;
use crate::tools::filesystem::{SafeFs, DEFAULT_MAX_OUTPUT_BYTES};
use crate::tools::schema::{parse_input, ModifyInput, ReadInput, RunInput, WriteInput};
use crate::tools::shell::run_command;
use crate::tools::{ToolCall, ToolDispatch, ToolKind, ToolOutput};

/// 工具宿主：run / read / write / modify 四类操作
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn run(&self, ctx: &ExecutionContext, input: RunInput) -> Result<ToolOutput, HiveError>;

    async fn read(&self, ctx: &ExecutionContext, input: ReadInput) -> Result<ToolOutput, HiveError>;

    async fn write(&self, ctx: &ExecutionContext, input: WriteInput)
        -> Result<ToolOutput, HiveError>;

    async fn modify(
        &self,
        ctx: &ExecutionContext,
        input: ModifyInput,
    ) -> Result<ToolOutput, HiveError>;
}

/// 本机宿主：路径先经白名单校验
#[derive(Debug, Clone)]
pub struct LocalHost {
    max_output_bytes: usize,
}

impl LocalHost {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

#[async_trait]
impl ToolHost for LocalHost {
    async fn run(&self, ctx: &ExecutionContext, input: RunInput) -> Result<ToolOutput, HiveError> {
        run_command(ctx, &input.command, self.max_output_bytes).await
    }

    async fn read(&self, ctx: &ExecutionContext, input: ReadInput) -> Result<ToolOutput, HiveError> {
        SafeFs::new(ctx, self.max_output_bytes).view(&input).await
    }

    async fn write(
        &self,
        ctx: &ExecutionContext,
        input: WriteInput,
    ) -> Result<ToolOutput, HiveError> {
        SafeFs::new(ctx, self.max_output_bytes).create(&input).await
    }

    async fn modify(
        &self,
        ctx: &ExecutionContext,
        input: ModifyInput,
    ) -> Result<ToolOutput, HiveError> {
        SafeFs::new(ctx, self.max_output_bytes).str_replace(&input).await
    }
}

/// 按工具名把调用路由到宿主的四类操作
#[derive(Clone)]
pub struct HostDispatch {
    host: Arc<dyn ToolHost>,
}

impl HostDispatch {
    pub fn new(host: Arc<dyn ToolHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl ToolDispatch for HostDispatch {
    async fn dispatch(&self, ctx: &ExecutionContext, call: &ToolCall) -> Result<ToolOutput, HiveError> {
        let kind = ToolKind::from_tool_name(&call.name).ok_or_else(|| HiveError::DispatchFailed {
            tool_name: call.name.clone(),
            reason: "unknown tool".to_string(),
        })?;
        match kind {
            ToolKind::Run => self.host.run(ctx, parse_input(call)?).await,
            ToolKind::Read => self.host.read(ctx, parse_input(call)?).await,
            ToolKind::Write => self.host.write(ctx, parse_input(call)?).await,
            ToolKind::Modify => self.host.modify(ctx, parse_input(call)?).await,
        }
    }

    fn describe(&self, call: &ToolCall) -> String {
        match call.input.get("command").and_then(|v| v.as_str()) {
            Some(cmd) => cmd.to_string(),
            None => format!("{} {}", call.name, call.args_preview()),
        }
    }
}
