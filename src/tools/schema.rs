//! 工具输入结构与 JSON Schema 生成（schemars 自动生成工具 Schema）
//!
//! 四类工具的输入都是带 JsonSchema 的结构体：同一份定义既生成给模型的 input_schema，
//! 又用于反序列化模型传入的参数，保证 Schema 与实际解析一致。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::core::HiveError;
use crate::llm::ToolDefinition;
use crate::tools::{ToolCall, ToolKind};

/// bash_tool：运行一条 shell 命令
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunInput {
    /// 要执行的命令
    pub command: String,
    /// 为什么运行这条命令（可选，仅用于日志）
    #[serde(default)]
    pub description: Option<String>,
}

/// view：查看文件（带行号）或目录（两级）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReadInput {
    /// 文件或目录路径
    pub path: String,
    /// 可选行范围 [start, end]，从 1 开始，end 为 -1 表示到文件末尾
    #[serde(default)]
    pub view_range: Option<[i64; 2]>,
}

/// create_file：创建或覆盖文件
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WriteInput {
    pub path: String,
    /// 文件完整内容
    pub file_text: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// str_replace：把文件中唯一出现的 old_str 替换为 new_str
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ModifyInput {
    pub path: String,
    /// 必须在文件中恰好出现一次
    pub old_str: String,
    /// 替换内容，省略时删除 old_str
    #[serde(default)]
    pub new_str: String,
}

/// 生成某个输入类型的 schema（去掉 $schema / title 元字段）
fn input_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

impl ToolKind {
    pub fn input_schema(&self) -> Value {
        match self {
            ToolKind::Run => input_schema::<RunInput>(),
            ToolKind::Read => input_schema::<ReadInput>(),
            ToolKind::Write => input_schema::<WriteInput>(),
            ToolKind::Modify => input_schema::<ModifyInput>(),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::Run => "Run a shell command in the working directory. Use it to execute skill scripts.",
            ToolKind::Read => "View a file with line numbers, or list a directory up to two levels deep.",
            ToolKind::Write => "Create a new file (or overwrite an existing one) with the given content.",
            ToolKind::Modify => "Replace a unique occurrence of old_str with new_str in a file.",
        }
    }

    /// 本机 / 容器会话中的工具定义
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.tool_name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// 本机 / 容器会话的完整工具目录
pub fn direct_catalog() -> Vec<ToolDefinition> {
    ToolKind::ALL.iter().map(ToolKind::definition).collect()
}

/// 把工具调用的参数解析为类型化输入
pub fn parse_input<T: DeserializeOwned>(call: &ToolCall) -> Result<T, HiveError> {
    serde_json::from_value(Value::Object(call.input.clone())).map_err(|e| HiveError::InvalidInput {
        tool: call.name.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_catalog_has_four_tools_with_schemas() {
        let catalog = direct_catalog();
        let names: Vec<_> = catalog.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["bash_tool", "view", "create_file", "str_replace"]);
        let run = &catalog[0].input_schema;
        assert_eq!(run["type"], json!("object"));
        assert!(run["properties"]["command"].is_object());
        assert!(run["required"].as_array().unwrap().contains(&json!("command")));
        assert!(run.get("$schema").is_none());
    }

    #[test]
    fn test_parse_input_reports_tool() {
        let call = ToolCall::new("t1", "view", serde_json::Map::new());
        let err = parse_input::<ReadInput>(&call).unwrap_err();
        match err {
            HiveError::InvalidInput { tool, .. } => assert_eq!(tool, "view"),
            other => panic!("unexpected {other:?}"),
        }

        let mut input = serde_json::Map::new();
        input.insert("path".into(), json!("a.txt"));
        input.insert("old_str".into(), json!("x"));
        let call = ToolCall::new("t2", "str_replace", input);
        let parsed: ModifyInput = parse_input(&call).unwrap();
        assert_eq!(parsed.new_str, "");
    }
}
