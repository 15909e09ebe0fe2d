//! 工具结果循环（本机 / 容器 / 进程内共用）
//!
//! AwaitingModel -> Dispatching -> AwaitingModel ... -> Done | Failed。
//! 模型返回 tool_use 时整轮并发执行，把助手消息原样追加，再追加一条携带全部结果的 user 消息；
//! 迭代计数从第一次模型调用记为 1，下一次调用会超过 max_iterations 时以 MaxIterationsReached 失败。
//! 请求带 container 段时（混合会话中的托管技能），pause_turn 视为「仍在执行」，
//! 不做本地分发直接续跑，计入续跑上限。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::artifacts::{collect_hosted_files, ArtifactLedger, ArtifactRef};
use crate::core::HiveError;
use crate::llm::{Message, ModelClient, ModelRequest, ModelResponse};
use crate::sandbox::ExecutionContext;
use crate::tools::{tool_result_message, ToolCall, ToolExecutor, ToolOutcome};

/// 执行一轮工具调用；返回的结局与 calls 一一对应、顺序一致。
/// Err 只用于整轮都无法执行的情况（例如隔离运行时不可用）
#[async_trait]
pub(crate) trait RoundDispatch: Send + Sync {
    async fn dispatch_round(
        &self,
        calls: &[ToolCall],
        ledger: &ArtifactLedger,
    ) -> Result<Vec<ToolOutcome>, HiveError>;
}

/// 单一执行器 + 单一上下文
pub(crate) struct SingleRound<'a> {
    pub executor: &'a ToolExecutor,
    pub ctx: &'a ExecutionContext,
}

#[async_trait]
impl RoundDispatch for SingleRound<'_> {
    async fn dispatch_round(
        &self,
        calls: &[ToolCall],
        _ledger: &ArtifactLedger,
    ) -> Result<Vec<ToolOutcome>, HiveError> {
        self.executor.execute_all(self.ctx, calls).await
    }
}

/// 循环会修改的会话字段（调用方的工作副本）
pub(crate) struct TurnState<'s> {
    pub messages: &'s mut Vec<Message>,
    pub artifacts: &'s mut ArtifactLedger,
    pub continuation_id: &'s mut Option<String>,
}

impl TurnState<'_> {
    /// 记录产物，返回本次新增的
    pub fn record(&mut self, artifacts: Vec<ArtifactRef>) -> Vec<ArtifactRef> {
        self.artifacts.extend(artifacts)
    }
}

/// 一次 chat 的汇总
#[derive(Debug, Clone)]
pub(crate) struct TurnSummary {
    pub response: ModelResponse,
    pub iterations: usize,
    pub tool_calls: usize,
    pub artifacts: Vec<ArtifactRef>,
}

/// 调用模型；取消令牌在调用前与调用中都生效
pub(crate) async fn call_model(
    model: &dyn ModelClient,
    messages: &[Message],
    request: &ModelRequest,
    cancel: Option<&CancellationToken>,
) -> Result<ModelResponse, HiveError> {
    let Some(token) = cancel else {
        return model.call(messages, request).await.map_err(HiveError::ModelCall);
    };
    if token.is_cancelled() {
        return Err(HiveError::Cancelled);
    }
    tokio::select! {
        _ = token.cancelled() => Err(HiveError::Cancelled),
        result = model.call(messages, request) => result.map_err(HiveError::ModelCall),
    }
}

enum LoopState {
    AwaitingModel,
    Dispatching(ModelResponse, Vec<ToolCall>),
    Done(ModelResponse),
}

/// 工具结果循环的配置
pub(crate) struct ToolLoop<'a> {
    pub model: &'a dyn ModelClient,
    pub request: ModelRequest,
    pub max_iterations: usize,
    /// Some 时启用 pause_turn 续跑
    pub max_continuations: Option<usize>,
    pub cancel: Option<&'a CancellationToken>,
}

impl ToolLoop<'_> {
    pub async fn run(
        mut self,
        dispatch: &dyn RoundDispatch,
        state: &mut TurnState<'_>,
    ) -> Result<TurnSummary, HiveError> {
        let mut iterations = 1usize;
        let mut pauses = 0usize;
        let mut tool_calls = 0usize;
        let mut new_artifacts = Vec::new();
        let mut loop_state = LoopState::AwaitingModel;

        loop {
            loop_state = match loop_state {
                LoopState::AwaitingModel => {
                    if let Some(container) = self.request.container.as_mut() {
                        container.id = state.continuation_id.clone();
                    }
                    tracing::debug!(iteration = iterations, "awaiting model");
                    let response =
                        call_model(self.model, state.messages.as_slice(), &self.request, self.cancel).await?;
                    if self.request.container.is_some() {
                        if let Some(id) = &response.container_id {
                            *state.continuation_id = Some(id.clone());
                        }
                        new_artifacts.extend(state.record(collect_hosted_files(&response.content)));
                    }
                    let calls = ToolCall::extract(&response.content);
                    if !calls.is_empty() {
                        LoopState::Dispatching(response, calls)
                    } else if let (Some(max), true) =
                        (self.max_continuations, response.stop_reason.is_still_working())
                    {
                        state.messages.push(Message::assistant(response.content));
                        pauses += 1;
                        if pauses + 1 > max {
                            return Err(HiveError::MaxContinuationsExceeded {
                                count: pauses + 1,
                                max,
                            });
                        }
                        tracing::debug!(pauses, "remote execution still working, continuing");
                        LoopState::AwaitingModel
                    } else {
                        LoopState::Done(response)
                    }
                }
                LoopState::Dispatching(response, calls) => {
                    tracing::debug!(iteration = iterations, calls = calls.len(), "dispatching tool calls");
                    let outcomes = dispatch.dispatch_round(&calls, &*state.artifacts).await?;
                    tool_calls += calls.len();
                    let mut results = Vec::with_capacity(outcomes.len());
                    for outcome in outcomes {
                        new_artifacts.extend(state.record(outcome.artifacts));
                        results.push(outcome.result);
                    }
                    state.messages.push(Message::assistant(response.content));
                    state.messages.push(tool_result_message(&results));
                    iterations += 1;
                    if iterations > self.max_iterations {
                        return Err(HiveError::MaxIterationsReached {
                            max: self.max_iterations,
                        });
                    }
                    LoopState::AwaitingModel
                }
                LoopState::Done(response) => {
                    state.messages.push(Message::assistant(response.content.clone()));
                    return Ok(TurnSummary {
                        response,
                        iterations,
                        tool_calls,
                        artifacts: new_artifacts,
                    });
                }
            };
        }
    }
}
