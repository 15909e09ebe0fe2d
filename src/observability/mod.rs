//! 可观测性
//!
//! 工具调用的审计日志以 `audit` 字段输出 JSON，可用 `RUST_LOG=hive=info` 过滤。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅器；RUST_LOG 未设置时默认 info。重复调用返回 Err 而不是 panic。
pub fn init() -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_second_init_does_not_panic() {
        let _ = super::init();
        assert!(super::init().is_err());
    }
}
