//! 工具调用与结果
//!
//! ToolCall 只由解析模型响应产生；每个 ToolCall 恰好对应一个 ToolResult，且回传同一个 id。

use serde_json::{Map, Value};

use crate::artifacts::ArtifactRef;
use crate::llm::{ContentBlock, Message, ToolContent};

/// 四类工具操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolKind {
    Run,
    Read,
    Write,
    Modify,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [ToolKind::Run, ToolKind::Read, ToolKind::Write, ToolKind::Modify];

    /// 操作名（用于带前缀的工具名 `<skill>_<op>`）
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Run => "run",
            ToolKind::Read => "read",
            ToolKind::Write => "write",
            ToolKind::Modify => "modify",
        }
    }

    /// 本机 / 容器会话中暴露给模型的工具名
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolKind::Run => "bash_tool",
            ToolKind::Read => "view",
            ToolKind::Write => "create_file",
            ToolKind::Modify => "str_replace",
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tool_name() == name)
    }

    pub fn from_op(op: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == op)
    }

    /// `<owner>_<op>`，owner 中 `[A-Za-z0-9_-]` 以外的字符替换为 `_`
    pub fn prefixed_name(&self, owner: &str) -> String {
        let owner: String = owner
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        format!("{}_{}", owner, self.as_str())
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// 按出现顺序提取响应中的所有 tool_use 块
    pub fn extract(blocks: &[ContentBlock]) -> Vec<ToolCall> {
        blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some(ToolCall::new(id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// 同一调用换一个工具名（id 与输入不变）
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            name: name.into(),
            input: self.input.clone(),
        }
    }

    /// 审计日志用的参数预览
    pub fn args_preview(&self) -> String {
        let s = Value::Object(self.input.clone()).to_string();
        if s.chars().count() > 200 {
            format!("{}...", s.chars().take(200).collect::<String>())
        } else {
            s
        }
    }
}

/// 一次工具调用的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: ToolContent,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<ToolContent>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: ToolContent::Text(message.into()),
            is_error: true,
        }
    }

    pub fn to_block(&self) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: self.tool_call_id.clone(),
            content: self.content.clone(),
            is_error: self.is_error.then_some(true),
        }
    }
}

/// 工具执行成功时的输出：文本 + 本次调用产生的产物
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub artifacts: Vec<ArtifactRef>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// 把一轮的所有结果装进一条 user 消息，顺序与请求顺序一致
pub fn tool_result_message(results: &[ToolResult]) -> Message {
    Message::user(results.iter().map(ToolResult::to_block).collect::<Vec<_>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageContent;
    use serde_json::json;

    #[test]
    fn test_extract_keeps_request_order() {
        let blocks = vec![
            ContentBlock::text("let me look"),
            ContentBlock::tool_use("t1", "view", json!({"path": "a"})),
            ContentBlock::tool_use("t2", "bash_tool", json!({"command": "ls"})),
        ];
        let calls = ToolCall::extract(&blocks);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[1].name, "bash_tool");
    }

    #[test]
    fn test_result_message_echoes_ids() {
        let results = vec![ToolResult::ok("t1", "fine"), ToolResult::error("t2", "bad")];
        let msg = tool_result_message(&results);
        let MessageContent::Blocks(blocks) = msg.content else {
            panic!("expected blocks");
        };
        match &blocks[1] {
            ContentBlock::ToolResult { tool_use_id, is_error, .. } => {
                assert_eq!(tool_use_id, "t2");
                assert_eq!(*is_error, Some(true));
            }
            other => panic!("unexpected block {other:?}"),
        }
        match &blocks[0] {
            ContentBlock::ToolResult { is_error, .. } => assert_eq!(*is_error, None),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_tool_name(kind.tool_name()), Some(kind));
            assert_eq!(ToolKind::from_op(kind.as_str()), Some(kind));
        }
        assert_eq!(ToolKind::from_tool_name("rm"), None);
    }

    #[test]
    fn test_prefixed_name_is_sanitized() {
        assert_eq!(ToolKind::Run.prefixed_name("pdf"), "pdf_run");
        assert_eq!(ToolKind::Modify.prefixed_name("my skill.v2"), "my_skill_v2_modify");
    }
}
