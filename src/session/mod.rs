//! 会话门面
//!
//! Session 是一次对话的有状态句柄：消息历史、产物账本、续跑标识，以及按模式不同的执行状态
//! （执行上下文与隔离运行时、托管请求、混合路由表）。`chat` 只做模式分发，从不原地修改调用方持有的值：
//! 成功返回新的 Session，失败时 TurnFailure 携带截至失败时的历史。

mod options;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::artifacts::{ArtifactCache, ArtifactLedger, ArtifactRef, ArtifactSource, RemoteFiles};
use crate::core::HiveError;
use crate::engine::hosted::ContinuationLoop;
use crate::engine::hybrid::{Group, HybridRound, PathView};
use crate::engine::loop_::{SingleRound, ToolLoop, TurnState, TurnSummary};
use crate::engine::{RoutingTable, STAGING_DIR};
use crate::llm::{ContentBlock, Message, MessageContent, ModelClient, ModelRequest, StopReason};
use crate::sandbox::{ExecutionContext, IsolatedRuntime};
use crate::skills::SkillSet;
use crate::tools::ToolExecutor;

pub use options::{ChatOptions, SessionOptions};

/// 执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// 本机直接执行（路径白名单）
    Local,
    /// 隔离运行时（容器）内执行
    Sandboxed,
    /// 远端托管执行（续跑循环）
    Hosted,
    /// 进程内能力
    Native,
    /// 多后端混合
    Hybrid,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Sandboxed => "sandboxed",
            Mode::Hosted => "hosted",
            Mode::Native => "native",
            Mode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次成功 chat 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    /// 最终助手消息的文本
    pub text: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    /// 本轮模型调用次数（无工具调用时为 1）
    pub iterations: usize,
    pub tool_calls: usize,
    /// 本轮新增的产物
    pub artifacts: Vec<ArtifactRef>,
    pub continuation_id: Option<String>,
}

impl ChatResponse {
    fn from_summary(summary: TurnSummary, continuation_id: Option<String>) -> Self {
        Self {
            text: summary.response.text(),
            content: summary.response.content,
            stop_reason: summary.response.stop_reason,
            iterations: summary.iterations,
            tool_calls: summary.tool_calls,
            artifacts: summary.artifacts,
            continuation_id,
        }
    }
}

/// chat 失败：错误 + 截至失败时的会话（调用方可检查历史或调用 cleanup）
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct TurnFailure {
    pub error: HiveError,
    pub partial: Box<Session>,
}

#[derive(Clone)]
pub(crate) struct DirectState {
    pub executor: ToolExecutor,
    /// 容器模式才有
    pub runtime: Option<Arc<dyn IsolatedRuntime>>,
    pub request: ModelRequest,
    pub view: PathView,
    /// 工作目录由会话自己创建（未指定 working_directory），cleanup 时整个删除
    pub owns_working_dir: bool,
}

#[derive(Clone)]
pub(crate) struct HostedState {
    pub request: ModelRequest,
    pub remote: Option<Arc<dyn RemoteFiles>>,
}

#[derive(Clone)]
pub(crate) struct HybridState {
    pub subs: BTreeMap<Mode, Session>,
    pub routes: Arc<RoutingTable>,
    pub cache: Option<Arc<ArtifactCache>>,
    pub request: ModelRequest,
}

/// 按模式不同的执行状态
#[derive(Clone)]
pub(crate) enum ModeState {
    /// 本机 / 容器 / 进程内：工具结果循环
    Direct(DirectState),
    Hosted(HostedState),
    Hybrid(HybridState),
}

#[derive(Clone)]
pub struct Session {
    pub(crate) id: String,
    pub(crate) mode: Mode,
    pub(crate) skills: SkillSet,
    pub(crate) messages: Vec<Message>,
    pub(crate) continuation_id: Option<String>,
    pub(crate) artifacts: ArtifactLedger,
    pub(crate) context: Option<ExecutionContext>,
    pub(crate) options: SessionOptions,
    pub(crate) state: ModeState,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("skills", &self.skills)
            .field("messages", &self.messages.len())
            .field("continuation_id", &self.continuation_id)
            .field("artifacts", &self.artifacts.len())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new_id() -> String {
        format!("session_{}", uuid::Uuid::new_v4().simple())
    }

    pub(crate) fn new(
        id: String,
        mode: Mode,
        skills: SkillSet,
        context: Option<ExecutionContext>,
        options: SessionOptions,
        state: ModeState,
    ) -> Self {
        Self {
            id,
            mode,
            skills,
            messages: Vec::new(),
            continuation_id: None,
            artifacts: ArtifactLedger::new(),
            context,
            options,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn skills(&self) -> &SkillSet {
        &self.skills
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn continuation_id(&self) -> Option<&str> {
        self.continuation_id.as_deref()
    }

    pub fn artifacts(&self) -> &ArtifactLedger {
        &self.artifacts
    }

    pub fn context(&self) -> Option<&ExecutionContext> {
        self.context.as_ref()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// 混合会话的子会话
    pub fn sub_sessions(&self) -> Option<&BTreeMap<Mode, Session>> {
        match &self.state {
            ModeState::Hybrid(h) => Some(&h.subs),
            _ => None,
        }
    }

    /// 混合会话的路由表
    pub fn routing_table(&self) -> Option<&RoutingTable> {
        match &self.state {
            ModeState::Hybrid(h) => Some(h.routes.as_ref()),
            _ => None,
        }
    }

    /// 每次模型调用携带的请求参数（系统提示词、工具目录、容器段）
    pub fn model_request(&self) -> &ModelRequest {
        match &self.state {
            ModeState::Direct(d) => &d.request,
            ModeState::Hosted(h) => &h.request,
            ModeState::Hybrid(h) => &h.request,
        }
    }

    /// 发送一条用户消息并跑完一整轮
    pub async fn chat(
        &self,
        user: impl Into<MessageContent>,
        model: &dyn ModelClient,
        opts: &ChatOptions,
    ) -> Result<(ChatResponse, Session), TurnFailure> {
        let mut working = self.clone();
        working.messages.push(Message::user(user));
        tracing::info!(session_id = %working.id, mode = %working.mode, "chat turn start");

        match working.run_turn(model, opts.cancel.as_ref()).await {
            Ok(summary) => {
                tracing::info!(
                    session_id = %working.id,
                    iterations = summary.iterations,
                    tool_calls = summary.tool_calls,
                    "chat turn done"
                );
                let response = ChatResponse::from_summary(summary, working.continuation_id.clone());
                Ok((response, working))
            }
            Err(error) => {
                tracing::warn!(session_id = %working.id, error = %error, "chat turn failed");
                Err(TurnFailure {
                    error,
                    partial: Box::new(working),
                })
            }
        }
    }

    async fn run_turn(
        &mut self,
        model: &dyn ModelClient,
        cancel: Option<&CancellationToken>,
    ) -> Result<TurnSummary, HiveError> {
        self.ensure_runtime().await?;
        if let ModeState::Hybrid(hybrid) = &mut self.state {
            for sub in hybrid.subs.values_mut() {
                sub.ensure_runtime().await?;
            }
        }

        let mut turn = TurnState {
            messages: &mut self.messages,
            artifacts: &mut self.artifacts,
            continuation_id: &mut self.continuation_id,
        };
        match &self.state {
            ModeState::Direct(direct) => {
                let ctx = self
                    .context
                    .as_ref()
                    .ok_or_else(|| HiveError::Config("session has no execution context".to_string()))?;
                let round = SingleRound {
                    executor: &direct.executor,
                    ctx,
                };
                ToolLoop {
                    model,
                    request: direct.request.clone(),
                    max_iterations: self.options.max_iterations,
                    max_continuations: None,
                    cancel,
                }
                .run(&round, &mut turn)
                .await
            }
            ModeState::Hosted(hosted) => {
                ContinuationLoop {
                    model,
                    request: hosted.request.clone(),
                    max_continuations: self.options.max_continuations,
                    cancel,
                }
                .run(&mut turn)
                .await
            }
            ModeState::Hybrid(hybrid) => {
                let mut groups = BTreeMap::new();
                for (mode, sub) in &hybrid.subs {
                    if let (ModeState::Direct(direct), Some(ctx)) = (&sub.state, sub.context.as_ref()) {
                        groups.insert(
                            *mode,
                            Group {
                                executor: &direct.executor,
                                ctx,
                                view: direct.view.clone(),
                            },
                        );
                    }
                }
                let round = HybridRound {
                    routes: hybrid.routes.as_ref(),
                    groups,
                    cache: hybrid.cache.as_deref(),
                };
                let hosted = hybrid.request.container.is_some();
                ToolLoop {
                    model,
                    request: hybrid.request.clone(),
                    max_iterations: self.options.max_iterations,
                    max_continuations: hosted.then_some(self.options.max_continuations),
                    cancel,
                }
                .run(&round, &mut turn)
                .await
            }
        }
    }

    /// 容器模式：首次需要时启动隔离运行时，并把标识写入执行上下文
    async fn ensure_runtime(&mut self) -> Result<(), HiveError> {
        let (ModeState::Direct(DirectState { runtime: Some(runtime), .. }), Some(ctx)) =
            (&self.state, self.context.as_mut())
        else {
            return Ok(());
        };
        if ctx.isolated_runtime_id.is_none() {
            let id = runtime.start(ctx, &self.id).await?;
            tracing::info!(session_id = %self.id, runtime_id = %id, "isolated runtime started");
            ctx.isolated_runtime_id = Some(id);
        }
        Ok(())
    }

    /// 清空消息历史与续跑标识；产物账本保留
    pub fn reset_messages(&self) -> Session {
        let mut session = self.clone();
        session.messages.clear();
        session.continuation_id = None;
        session
    }

    /// 释放会话资源：停止隔离运行时，删除会话自建的工作目录（调用方指定的目录只删暂存的托管产物），
    /// 删除托管端产物（配置了 RemoteFiles 时），清理产物缓存。之后账本清空。所有步骤都会尝试，返回遇到的第一个错误
    pub async fn cleanup(&mut self) -> Result<(), HiveError> {
        let ledger = std::mem::take(&mut self.artifacts);
        let mut first_err = None;
        if let ModeState::Hybrid(hybrid) = &mut self.state {
            for sub in hybrid.subs.values_mut() {
                if let Err(e) = sub.release(&ledger).await {
                    first_err.get_or_insert(e);
                }
            }
            if let Some(cache) = &hybrid.cache {
                if let Err(e) = cache.cleanup().await {
                    first_err.get_or_insert(e);
                }
            }
        } else if let Err(e) = self.release(&ledger).await {
            first_err.get_or_insert(e);
        }
        self.continuation_id = None;
        tracing::info!(session_id = %self.id, released = ledger.len(), "session cleaned up");
        first_err.map_or(Ok(()), Err)
    }

    async fn release(&mut self, ledger: &ArtifactLedger) -> Result<(), HiveError> {
        match &self.state {
            ModeState::Direct(direct) => {
                let Some(ctx) = self.context.as_mut() else {
                    return Ok(());
                };
                let mut first_err = None;
                if let (Some(runtime), Some(id)) = (&direct.runtime, ctx.isolated_runtime_id.take()) {
                    if let Err(e) = runtime.stop(&id).await {
                        first_err.get_or_insert(e);
                    }
                }
                let doomed = if direct.owns_working_dir {
                    ctx.working_dir.clone()
                } else {
                    ctx.working_dir.join(STAGING_DIR)
                };
                match tokio::fs::remove_dir_all(&doomed).await {
                    Ok(()) => tracing::debug!(path = %doomed.display(), "removed session files"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        first_err.get_or_insert(e.into());
                    }
                }
                first_err.map_or(Ok(()), Err)
            }
            ModeState::Hosted(hosted) => {
                let Some(remote) = &hosted.remote else {
                    return Ok(());
                };
                let mut first_err = None;
                for artifact in ledger.entries().iter().filter(|a| a.source == ArtifactSource::Hosted) {
                    if let Err(e) = remote.delete(&artifact.id).await {
                        tracing::warn!(artifact = %artifact.id, error = %e, "failed to delete hosted artifact");
                        first_err.get_or_insert(HiveError::ArtifactUnavailable {
                            id: artifact.id.clone(),
                            reason: format!("delete failed: {e}"),
                        });
                    }
                }
                first_err.map_or(Ok(()), Err)
            }
            ModeState::Hybrid(_) => Ok(()),
        }
    }
}
