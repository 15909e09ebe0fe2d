//! 进程内分发：工具名 `<capability>_<op>` → (能力, 操作)
//!
//! 分发表在会话创建时一次性建好；未知或未声明的工具名是 DispatchFailed，
//! 能力返回的错误同样转为 DispatchFailed。panic 由 ToolExecutor 在分发边界捕获。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::HiveError;
use crate::llm::ToolDefinition;
use crate::native::Capability;
use crate::sandbox::ExecutionContext;
use crate::tools::{ToolCall, ToolDispatch, ToolKind, ToolOutput};

#[derive(Clone)]
struct Entry {
    capability: Arc<dyn Capability>,
    kind: ToolKind,
}

#[derive(Clone, Default)]
pub struct NativeDispatch {
    table: BTreeMap<String, Entry>,
}

impl NativeDispatch {
    /// 两个能力生成同一个工具名时返回 Config 错误
    pub fn build(capabilities: &[Arc<dyn Capability>]) -> Result<Self, HiveError> {
        let mut table = BTreeMap::new();
        for capability in capabilities {
            let mut ops = capability.operations();
            ops.sort();
            ops.dedup();
            for kind in ops {
                let name = kind.prefixed_name(capability.name());
                let entry = Entry {
                    capability: capability.clone(),
                    kind,
                };
                if table.insert(name.clone(), entry).is_some() {
                    return Err(HiveError::Config(format!("duplicate native tool name '{name}'")));
                }
            }
        }
        Ok(Self { table })
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.table.keys().cloned().collect()
    }

    pub fn catalog(&self) -> Vec<ToolDefinition> {
        self.table
            .iter()
            .map(|(name, e)| {
                let description = match e.capability.description() {
                    "" => format!("{} operation of {}", e.kind, e.capability.name()),
                    d => format!("{d} ({} operation)", e.kind),
                };
                ToolDefinition {
                    name: name.clone(),
                    description,
                    input_schema: e.capability.input_schema(e.kind),
                }
            })
            .collect()
    }
}

#[async_trait]
impl ToolDispatch for NativeDispatch {
    async fn dispatch(&self, ctx: &ExecutionContext, call: &ToolCall) -> Result<ToolOutput, HiveError> {
        let entry = self.table.get(&call.name).ok_or_else(|| HiveError::DispatchFailed {
            tool_name: call.name.clone(),
            reason: "unknown or unsupported tool".to_string(),
        })?;
        let input = call.input.clone();
        let capability = &entry.capability;
        let result = match entry.kind {
            ToolKind::Run => capability.run(ctx, input).await,
            ToolKind::Read => capability.read(ctx, input).await,
            ToolKind::Write => capability.write(ctx, input).await,
            ToolKind::Modify => capability.modify(ctx, input).await,
        };
        result.map(ToolOutput::text).map_err(|reason| HiveError::DispatchFailed {
            tool_name: call.name.clone(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::CapabilityInput;
    use serde_json::json;

    struct Counter;

    #[async_trait]
    impl Capability for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn description(&self) -> &str {
            "Counts words"
        }

        fn operations(&self) -> Vec<ToolKind> {
            vec![ToolKind::Run, ToolKind::Run]
        }

        async fn run(&self, _ctx: &ExecutionContext, input: CapabilityInput) -> Result<String, String> {
            let text = input
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or("missing text")?;
            Ok(text.split_whitespace().count().to_string())
        }
    }

    fn call(name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall::new("c1", name, input.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn test_dispatch_by_prefixed_name() {
        let dispatch = NativeDispatch::build(&[Arc::new(Counter) as Arc<dyn Capability>]).unwrap();
        assert_eq!(dispatch.tool_names(), vec!["counter_run".to_string()]);
        let ctx = ExecutionContext::new("/s", "/w");
        let out = dispatch
            .dispatch(&ctx, &call("counter_run", json!({"text": "a b c"})))
            .await
            .unwrap();
        assert_eq!(out.content, "3");
        assert!(dispatch.catalog()[0].description.starts_with("Counts words"));
    }

    #[tokio::test]
    async fn test_unknown_and_failed_calls_are_dispatch_errors() {
        let dispatch = NativeDispatch::build(&[Arc::new(Counter) as Arc<dyn Capability>]).unwrap();
        let ctx = ExecutionContext::new("/s", "/w");
        for c in [call("counter_read", json!({})), call("counter_run", json!({}))] {
            assert!(matches!(
                dispatch.dispatch(&ctx, &c).await,
                Err(HiveError::DispatchFailed { .. })
            ));
        }
    }

    #[test]
    fn test_duplicate_capability_names_rejected() {
        let caps: Vec<Arc<dyn Capability>> = vec![Arc::new(Counter), Arc::new(Counter)];
        assert!(matches!(NativeDispatch::build(&caps), Err(HiveError::Config(_))));
    }
}
