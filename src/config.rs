//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__SESSION__TIMEOUT_MS=5000`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::artifacts::ArtifactCacheConfig;
use crate::sandbox::DockerConfig;
use crate::session::SessionOptions;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// [session] 段：新会话的默认选项
    pub session: SessionOptions,
    /// [docker] 段：容器运行时
    pub docker: DockerConfig,
    /// [artifacts] 段：跨后端产物缓存
    pub artifacts: ArtifactCacheConfig,
}

impl AppConfig {
    pub fn session_options(&self) -> SessionOptions {
        self.session.clone()
    }

    pub fn docker_config(&self) -> DockerConfig {
        self.docker.clone()
    }

    pub fn artifact_cache_config(&self) -> ArtifactCacheConfig {
        self.artifacts.clone()
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let cfg: AppConfig = c.try_deserialize()?;
    tracing::debug!(
        timeout_ms = cfg.session.timeout_ms,
        max_iterations = cfg.session.max_iterations,
        "config loaded"
    );
    Ok(cfg)
}

/// 重新从磁盘与环境变量加载配置；已创建的会话不受影响
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[session]
max_iterations = 7
timeout_ms = 1500
allowed_paths = ["/data"]

[docker]
image = "python:3.12-slim"
cpus = 2.0

[artifacts]
max_entries = 8
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        let session = cfg.session_options();
        assert_eq!(session.max_iterations, 7);
        assert_eq!(session.timeout_ms, 1500);
        assert_eq!(session.allowed_paths, vec![PathBuf::from("/data")]);
        assert_eq!(session.max_continuations, SessionOptions::default().max_continuations);

        let docker = cfg.docker_config();
        assert_eq!(docker.image.as_deref(), Some("python:3.12-slim"));
        assert_eq!(docker.cpus, 2.0);
        assert_eq!(cfg.artifact_cache_config().max_entries, 8);
    }

    #[test]
    fn test_defaults_without_sources() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.session, SessionOptions::default());
        assert_eq!(cfg.docker, DockerConfig::default());
        assert_eq!(cfg.artifacts.ttl_secs, ArtifactCacheConfig::default().ttl_secs);
    }
}
