//! 工具箱：四类操作（run / read / write / modify）的调用模型、Schema、本机实现与并发执行器

pub mod call;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod schema;
pub mod shell;

pub use call::{tool_result_message, ToolCall, ToolKind, ToolOutput, ToolResult};
pub use executor::{ToolDispatch, ToolExecutor, ToolOutcome};
pub use filesystem::{SafeFs, DEFAULT_MAX_OUTPUT_BYTES};
pub use registry::{HostDispatch, LocalHost, ToolHost};
pub use schema::{direct_catalog, parse_input, ModifyInput, ReadInput, RunInput, WriteInput};
pub use shell::run_command;
