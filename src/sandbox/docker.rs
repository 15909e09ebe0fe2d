//! 基于 docker CLI 的隔离运行时
//!
//! 每个会话一个常驻容器（`sleep infinity`）：技能目录只读挂载，工作目录读写挂载，
//! 默认断网并限制内存与 CPU。命令通过 `docker exec -i` 执行，销毁时 `docker rm -f`。

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::core::HiveError;
use crate::sandbox::{ExecOutput, ExecRequest, ExecutionContext, IsolatedRuntime};

/// [docker] 段
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_skills_mount")]
    pub skills_mount: String,
    #[serde(default = "default_workspace_mount")]
    pub workspace_mount: String,
}

fn default_network() -> String {
    "none".to_string()
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_cpus() -> f64 {
    1.0
}

fn default_binary() -> String {
    "docker".to_string()
}

fn default_skills_mount() -> String {
    "/mnt/skills".to_string()
}

fn default_workspace_mount() -> String {
    "/workspace".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: None,
            network: default_network(),
            memory: default_memory(),
            cpus: default_cpus(),
            binary: default_binary(),
            skills_mount: default_skills_mount(),
            workspace_mount: default_workspace_mount(),
        }
    }
}

impl DockerConfig {
    /// 会话的 executor_config 覆盖 image / network / memory / cpus
    pub fn merged(&self, overrides: &HashMap<String, Value>) -> Self {
        let mut out = self.clone();
        if let Some(image) = overrides.get("image").and_then(Value::as_str) {
            out.image = Some(image.to_string());
        }
        if let Some(network) = overrides.get("network").and_then(Value::as_str) {
            out.network = network.to_string();
        }
        if let Some(memory) = overrides.get("memory").and_then(Value::as_str) {
            out.memory = memory.to_string();
        }
        if let Some(cpus) = overrides.get("cpus").and_then(Value::as_f64) {
            out.cpus = cpus;
        }
        out
    }
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct DockerRuntime {
    config: DockerConfig,
}

impl DockerRuntime {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    /// `docker run` 的参数（不含可执行文件本身）
    pub fn run_args(&self, ctx: &ExecutionContext, session_id: &str) -> Result<Vec<String>, HiveError> {
        let config = self.config.merged(&ctx.executor_config);
        let image = config
            .image
            .clone()
            .ok_or_else(|| HiveError::runtime("start", "no container image configured"))?;

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            format!("hive-{}", sanitize_id(session_id)),
            "--network".to_string(),
            config.network.clone(),
            "-m".to_string(),
            config.memory.clone(),
            "--cpus".to_string(),
            config.cpus.to_string(),
            "-v".to_string(),
            format!("{}:{}:ro", ctx.skills_root.display(), config.skills_mount),
            "-v".to_string(),
            format!("{}:{}:rw", ctx.working_dir.display(), config.workspace_mount),
            "-w".to_string(),
            config.workspace_mount.clone(),
        ];
        let mut env: Vec<_> = ctx.env.iter().collect();
        env.sort();
        for (key, val) in env {
            args.push("-e".to_string());
            args.push(format!("{key}={val}"));
        }
        args.push(image);
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        Ok(args)
    }

    /// `docker exec` 的参数（不含可执行文件本身）
    pub fn exec_args(&self, runtime_id: &str, request: &ExecRequest) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if request.stdin.is_some() {
            args.push("-i".to_string());
        }
        if let Some(dir) = &request.workdir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        let mut env: Vec<_> = request.env.iter().collect();
        env.sort();
        for (key, val) in env {
            args.push("-e".to_string());
            args.push(format!("{key}={val}"));
        }
        args.push(runtime_id.to_string());
        args.extend(request.argv.iter().cloned());
        args
    }
}

#[async_trait]
impl IsolatedRuntime for DockerRuntime {
    async fn start(&self, ctx: &ExecutionContext, session_id: &str) -> Result<String, HiveError> {
        let args = self.run_args(ctx, session_id)?;
        tracing::info!(session_id = %session_id, "starting sandbox container");
        let output = Command::new(&self.config.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| HiveError::runtime("start", format!("failed to run {}: {e}", self.config.binary)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HiveError::runtime("start", format!("docker run failed: {}", stderr.trim())));
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(HiveError::runtime("start", "docker run returned no container id"));
        }
        tracing::info!(container_id = %container_id, "sandbox container started");
        Ok(container_id)
    }

    async fn exec(&self, runtime_id: &str, request: ExecRequest) -> Result<ExecOutput, HiveError> {
        let args = self.exec_args(runtime_id, &request);
        tracing::debug!(container = %runtime_id, argv = ?request.argv, "exec in sandbox");
        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(if request.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HiveError::runtime("exec", e.to_string()))?;

        if let (Some(bytes), Some(mut stdin)) = (request.stdin.as_ref(), child.stdin.take()) {
            stdin
                .write_all(bytes)
                .await
                .map_err(|e| HiveError::runtime("exec", format!("writing stdin: {e}")))?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| HiveError::runtime("exec", e.to_string()))?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn stop(&self, runtime_id: &str) -> Result<(), HiveError> {
        tracing::info!(container = %runtime_id, "stopping sandbox container");
        let output = Command::new(&self.config.binary)
            .args(["rm", "-f", runtime_id])
            .output()
            .await
            .map_err(|e| HiveError::runtime("stop", e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HiveError::runtime("stop", stderr.trim().to_string()));
        }
        Ok(())
    }

    fn skills_mount(&self) -> &str {
        &self.config.skills_mount
    }

    fn workspace_mount(&self) -> &str {
        &self.config.workspace_mount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("/srv/skills", "/tmp/work")
    }

    #[test]
    fn test_run_args_mounts_and_limits() {
        let runtime = DockerRuntime::new(DockerConfig {
            image: Some("python:3.12-slim".to_string()),
            ..Default::default()
        });
        let args = runtime.run_args(&ctx(), "session_1/x").unwrap();
        assert_eq!(&args[..4], ["run", "-d", "--name", "hive-session_1-x"]);
        assert!(args.contains(&"/srv/skills:/mnt/skills:ro".to_string()));
        assert!(args.contains(&"/tmp/work:/workspace:rw".to_string()));
        let net = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[net + 1], "none");
        assert_eq!(&args[args.len() - 3..], ["python:3.12-slim", "sleep", "infinity"]);
    }

    #[test]
    fn test_executor_config_overrides() {
        let runtime = DockerRuntime::new(DockerConfig::default());
        let mut overrides = HashMap::new();
        overrides.insert("image".to_string(), json!("alpine:3"));
        overrides.insert("network".to_string(), json!("bridge"));
        overrides.insert("cpus".to_string(), json!(0.5));
        let args = runtime
            .run_args(&ctx().with_executor_config(overrides), "s")
            .unwrap();
        assert!(args.contains(&"alpine:3".to_string()));
        assert!(args.contains(&"bridge".to_string()));
        assert!(args.contains(&"0.5".to_string()));
    }

    #[test]
    fn test_missing_image_is_runtime_error() {
        let err = DockerRuntime::default().run_args(&ctx(), "s").unwrap_err();
        assert!(matches!(err, HiveError::IsolatedRuntimeError { .. }));
    }

    #[test]
    fn test_exec_args_with_stdin() {
        let runtime = DockerRuntime::default();
        let request = ExecRequest::shell("cat > a.txt")
            .with_stdin(b"hi".to_vec())
            .with_workdir("/workspace");
        let args = runtime.exec_args("abc", &request);
        assert_eq!(args, ["exec", "-i", "-w", "/workspace", "abc", "sh", "-c", "cat > a.txt"]);
    }
}
