//! 模型层：消息模型、调用回调抽象与脚本化 Mock

pub mod mock;
pub mod traits;
pub mod types;

pub use mock::{RecordedCall, ScriptedModelClient};
pub use traits::{model_fn, FnModelClient, ModelClient};
pub use types::{
    ContainerRequest, ContentBlock, Message, MessageContent, ModelRequest, ModelResponse, Role,
    StopReason, ToolContent, ToolDefinition,
};
