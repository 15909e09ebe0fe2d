//! 执行沙箱：执行上下文与路径边界、隔离运行时（docker）及容器内工具宿主

pub mod container_host;
pub mod context;
pub mod docker;
pub mod runtime;

pub use container_host::ContainerHost;
pub use context::{validate_path, ExecutionContext, DEFAULT_TIMEOUT_MS};
pub use docker::{DockerConfig, DockerRuntime};
pub use runtime::{ExecOutput, ExecRequest, IsolatedRuntime};
