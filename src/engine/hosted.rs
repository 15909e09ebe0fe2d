//! 续跑循环（托管执行）
//!
//! 工具在远端执行；响应为 pause_turn 表示「仍在执行」：记录已报告的产物、追加助手消息、
//! 带上远端容器标识原样重发，本地不做任何工具执行。计数器统计模型调用次数，
//! 下一次调用会超过 max_continuations 时以 MaxContinuationsExceeded 失败。

use tokio_util::sync::CancellationToken;

use crate::artifacts::collect_hosted_files;
use crate::core::HiveError;
use crate::engine::loop_::{call_model, TurnState, TurnSummary};
use crate::llm::{Message, ModelClient, ModelRequest};

pub(crate) struct ContinuationLoop<'a> {
    pub model: &'a dyn ModelClient,
    pub request: ModelRequest,
    pub max_continuations: usize,
    pub cancel: Option<&'a CancellationToken>,
}

impl ContinuationLoop<'_> {
    pub async fn run(mut self, state: &mut TurnState<'_>) -> Result<TurnSummary, HiveError> {
        let mut count = 0usize;
        let mut new_artifacts = Vec::new();
        loop {
            count += 1;
            if count > self.max_continuations {
                return Err(HiveError::MaxContinuationsExceeded {
                    count,
                    max: self.max_continuations,
                });
            }
            let container = self.request.container.get_or_insert_with(Default::default);
            container.id = state.continuation_id.clone();

            let response =
                call_model(self.model, state.messages.as_slice(), &self.request, self.cancel).await?;
            if let Some(id) = &response.container_id {
                *state.continuation_id = Some(id.clone());
            }
            new_artifacts.extend(state.record(collect_hosted_files(&response.content)));
            state.messages.push(Message::assistant(response.content.clone()));

            if response.stop_reason.is_still_working() {
                tracing::debug!(count, container = ?state.continuation_id, "still working, resending");
                continue;
            }
            tracing::debug!(count, stop_reason = %response.stop_reason.as_str(), "hosted turn finished");
            return Ok(TurnSummary {
                response,
                iterations: count,
                tool_calls: 0,
                artifacts: new_artifacts,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactLedger, ArtifactSource};
    use crate::llm::{ContentBlock, ScriptedModelClient};
    use serde_json::json;

    fn script(pauses: usize) -> ScriptedModelClient {
        let mut responses: Vec<_> = (0..pauses)
            .map(|_| ScriptedModelClient::pause("cnt_9", vec![ContentBlock::text("working")]))
            .collect();
        responses.push(ScriptedModelClient::text("finished"));
        ScriptedModelClient::from_responses(responses)
    }

    async fn run(model: &ScriptedModelClient, max: usize) -> (Result<TurnSummary, HiveError>, Option<String>) {
        let mut messages = vec![Message::user("make a report")];
        let mut artifacts = ArtifactLedger::new();
        let mut continuation_id = None;
        let mut state = TurnState {
            messages: &mut messages,
            artifacts: &mut artifacts,
            continuation_id: &mut continuation_id,
        };
        let result = ContinuationLoop {
            model,
            request: ModelRequest::default(),
            max_continuations: max,
            cancel: None,
        }
        .run(&mut state)
        .await;
        (result, continuation_id)
    }

    #[tokio::test]
    async fn test_nine_pauses_fit_in_ten() {
        let model = script(9);
        let (result, id) = run(&model, 10).await;
        let summary = result.unwrap();
        assert_eq!(summary.iterations, 10);
        assert_eq!(summary.response.text(), "finished");
        assert_eq!(id.as_deref(), Some("cnt_9"));
    }

    #[tokio::test]
    async fn test_nine_pauses_exceed_nine() {
        let model = script(9);
        let (result, _) = run(&model, 9).await;
        assert!(matches!(
            result,
            Err(HiveError::MaxContinuationsExceeded { count: 10, max: 9 })
        ));
        assert_eq!(model.call_count().await, 9);
    }

    #[tokio::test]
    async fn test_container_id_is_resent_and_files_harvested() {
        let file_block: ContentBlock = serde_json::from_value(json!({
            "type": "code_execution_tool_result",
            "content": {"content": [{"file_id": "file_1", "filename": "r.pdf"}]}
        }))
        .unwrap();
        let model = ScriptedModelClient::from_responses(vec![
            ScriptedModelClient::pause("cnt_a", vec![file_block]),
            ScriptedModelClient::text("ok"),
        ]);
        let (result, _) = run(&model, 10).await;
        let summary = result.unwrap();
        assert_eq!(summary.artifacts.len(), 1);
        assert_eq!(summary.artifacts[0].source, ArtifactSource::Hosted);
        let calls = model.calls().await;
        assert_eq!(calls[0].request.container.as_ref().unwrap().id, None);
        assert_eq!(calls[1].request.container.as_ref().unwrap().id.as_deref(), Some("cnt_a"));
    }
}
