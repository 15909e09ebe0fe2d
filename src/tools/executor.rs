//! 工具执行器
//!
//! 持有分发器与并发池；一轮内的所有调用并发执行，每个调用单独施加超时（超时即取消该调用），
//! 分发边界捕获 panic；可恢复的错误转为 is_error 的 ToolResult，不影响同轮其它调用。
//! 不可恢复的错误（隔离运行时不可用等）在整轮汇合后作为 Err 返回，终止本次 chat。
//! 每次调用输出结构化审计日志（JSON）。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::time::timeout;

use crate::artifacts::ArtifactRef;
use crate::core::{HiveError, TaskScheduler};
use crate::sandbox::ExecutionContext;
use crate::tools::{ToolCall, ToolOutput, ToolResult};

/// 分发器：把一次工具调用交给真正的执行者
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn dispatch(&self, ctx: &ExecutionContext, call: &ToolCall) -> Result<ToolOutput, HiveError>;

    /// 超时报错时对这次调用的描述
    fn describe(&self, call: &ToolCall) -> String {
        call.name.clone()
    }
}

/// 单次调用的结局：结果 + 成功时产生的产物
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub result: ToolResult,
    pub artifacts: Vec<ArtifactRef>,
}

impl ToolOutcome {
    /// 未进入执行就失败的调用（路由失败、产物解析失败等）
    pub fn failed(tool_call_id: impl Into<String>, error: &HiveError) -> Self {
        Self {
            result: ToolResult::error(tool_call_id, error.to_string()),
            artifacts: Vec::new(),
        }
    }
}

/// 工具执行器：超时、panic 捕获、并发上限、审计日志
#[derive(Clone)]
pub struct ToolExecutor {
    dispatch: Arc<dyn ToolDispatch>,
    scheduler: TaskScheduler,
}

impl ToolExecutor {
    pub fn new(dispatch: Arc<dyn ToolDispatch>, scheduler: TaskScheduler) -> Self {
        Self {
            dispatch,
            scheduler,
        }
    }

    /// 执行单个调用；只有不可恢复的错误返回 Err，其余转为错误结果
    pub async fn execute(&self, ctx: &ExecutionContext, call: &ToolCall) -> Result<ToolOutcome, HiveError> {
        let _permit = self.scheduler.acquire_tool().await;
        let start = Instant::now();
        let budget = Duration::from_millis(ctx.timeout_ms);
        let fut = AssertUnwindSafe(self.dispatch.dispatch(ctx, call)).catch_unwind();

        let result = match timeout(budget, fut).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(panic)) => Err(HiveError::DispatchFailed {
                tool_name: call.name.clone(),
                reason: format!("panicked: {}", panic_message(panic.as_ref())),
            }),
            Err(_) => Err(HiveError::ExecutionTimeout {
                command: self.dispatch.describe(call),
                timeout_ms: ctx.timeout_ms,
            }),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(HiveError::ExecutionTimeout { .. }) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "tool_call_id": call.id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": call.args_preview(),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(output) => Ok(ToolOutcome {
                result: ToolResult::ok(call.id.clone(), output.content),
                artifacts: output.artifacts,
            }),
            Err(e) if e.is_recoverable() => Ok(ToolOutcome::failed(call.id.clone(), &e)),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "non-recoverable error inside a tool call");
                Err(e)
            }
        }
    }

    /// 并发执行一轮的所有调用；返回顺序与请求顺序一致。
    /// 所有调用结束后，若有不可恢复的错误则返回按请求顺序的第一个
    pub async fn execute_all(&self, ctx: &ExecutionContext, calls: &[ToolCall]) -> Result<Vec<ToolOutcome>, HiveError> {
        join_all(calls.iter().map(|call| self.execute(ctx, call)))
            .await
            .into_iter()
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
