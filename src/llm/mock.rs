//! 脚本化模型客户端（用于测试，无需 API）
//!
//! 按顺序回放预置的响应，并记录每次调用收到的消息与请求，便于断言循环行为。

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::llm::{ContentBlock, Message, ModelClient, ModelRequest, ModelResponse, StopReason};

/// 一次被记录的调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub request: ModelRequest,
}

/// 脚本耗尽后返回 end_turn 的固定文本
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    script: Mutex<VecDeque<Result<ModelResponse, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModelClient {
    pub fn new(script: Vec<Result<ModelResponse, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_responses(responses: Vec<ModelResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// 只含文本的 end_turn 响应
    pub fn text(text: &str) -> ModelResponse {
        ModelResponse::new(vec![ContentBlock::text(text)], StopReason::EndTurn)
    }

    /// 请求若干工具调用的 tool_use 响应：(id, name, input)
    pub fn tool_uses(calls: Vec<(&str, &str, Value)>) -> ModelResponse {
        let content = calls
            .into_iter()
            .map(|(id, name, input)| ContentBlock::tool_use(id, name, input))
            .collect();
        ModelResponse::new(content, StopReason::ToolUse)
    }

    /// 远端仍在执行的 pause_turn 响应
    pub fn pause(container_id: &str, blocks: Vec<ContentBlock>) -> ModelResponse {
        ModelResponse::new(blocks, StopReason::PauseTurn).with_container(container_id)
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn call(
        &self,
        messages: &[Message],
        request: &ModelRequest,
    ) -> Result<ModelResponse, String> {
        self.calls.lock().await.push(RecordedCall {
            messages: messages.to_vec(),
            request: request.clone(),
        });
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Self::text("(script exhausted)")))
    }
}
