//! 容器内的工具宿主
//!
//! 四类操作都通过 `exec` 在会话的隔离运行时里完成，隔离依赖挂载布局，不走 validate_path。
//! 相对路径以工作目录挂载点为基准。

use std::sync::Arc;

use async_trait::async_trait;

use crate::artifacts::ArtifactSource;
use crate::core::HiveError;
use crate::sandbox::{ExecOutput, ExecRequest, ExecutionContext, IsolatedRuntime};
use crate::tools::filesystem::{file_artifact, number_lines, replace_unique, truncate_output};
use crate::tools::shell::combine_output;
use crate::tools::{ModifyInput, ReadInput, RunInput, ToolHost, ToolOutput, WriteInput};

/// 单引号转义，供拼进 `sh -c` 脚本
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub struct ContainerHost {
    runtime: Arc<dyn IsolatedRuntime>,
    workspace_mount: String,
    max_output_bytes: usize,
}

impl ContainerHost {
    pub fn new(runtime: Arc<dyn IsolatedRuntime>, workspace_mount: impl Into<String>, max_output_bytes: usize) -> Self {
        Self {
            runtime,
            workspace_mount: workspace_mount.into(),
            max_output_bytes,
        }
    }

    fn runtime_id<'c>(&self, ctx: &'c ExecutionContext) -> Result<&'c str, HiveError> {
        ctx.isolated_runtime_id
            .as_deref()
            .ok_or_else(|| HiveError::runtime("exec", "isolated runtime not started"))
    }

    fn container_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            let rel = path.trim_start_matches("./");
            if rel.is_empty() || rel == "." {
                self.workspace_mount.clone()
            } else {
                format!("{}/{}", self.workspace_mount.trim_end_matches('/'), rel)
            }
        }
    }

    async fn exec(&self, ctx: &ExecutionContext, request: ExecRequest) -> Result<ExecOutput, HiveError> {
        let id = self.runtime_id(ctx)?;
        let request = request.with_workdir(self.workspace_mount.clone());
        self.runtime.exec(id, request).await
    }

    /// 执行脚本，非 0 退出码转为 ExecutionFailed
    async fn exec_checked(&self, ctx: &ExecutionContext, script: String, stdin: Option<Vec<u8>>) -> Result<ExecOutput, HiveError> {
        let mut request = ExecRequest::shell(script.clone()).with_env(ctx.env.clone());
        request.stdin = stdin;
        let output = self.exec(ctx, request).await?;
        if !output.success() {
            return Err(HiveError::ExecutionFailed {
                command: script,
                exit_code: output.exit_code,
                output: truncate_output(combine_output(&output.stdout, &output.stderr), self.max_output_bytes),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl ToolHost for ContainerHost {
    async fn run(&self, ctx: &ExecutionContext, input: RunInput) -> Result<ToolOutput, HiveError> {
        let output = self.exec_checked(ctx, input.command, None).await?;
        Ok(ToolOutput::text(truncate_output(
            combine_output(&output.stdout, &output.stderr),
            self.max_output_bytes,
        )))
    }

    async fn read(&self, ctx: &ExecutionContext, input: ReadInput) -> Result<ToolOutput, HiveError> {
        let path = self.container_path(&input.path);
        let probe = self
            .exec(ctx, ExecRequest::shell(format!("test -d {}", quote(&path))))
            .await?;
        let content = if probe.success() {
            let listing = self
                .exec_checked(
                    ctx,
                    format!("find {} -mindepth 1 -maxdepth 2 -not -name '.*' | sort", quote(&path)),
                    None,
                )
                .await?;
            format!("{}/\n{}", path, String::from_utf8_lossy(&listing.stdout).trim_end())
        } else {
            let file = self.exec_checked(ctx, format!("cat {}", quote(&path)), None).await?;
            number_lines(&String::from_utf8_lossy(&file.stdout), input.view_range)
                .map_err(|reason| HiveError::InvalidInput {
                    tool: "view".to_string(),
                    reason,
                })?
        };
        Ok(ToolOutput::text(truncate_output(content, self.max_output_bytes)))
    }

    async fn write(&self, ctx: &ExecutionContext, input: WriteInput) -> Result<ToolOutput, HiveError> {
        let path = self.container_path(&input.path);
        let script = format!("mkdir -p \"$(dirname {p})\" && cat > {p}", p = quote(&path));
        self.exec_checked(ctx, script, Some(input.file_text.clone().into_bytes()))
            .await?;
        let size = input.file_text.len() as u64;
        tracing::info!(path = %path, size, "file created in sandbox");
        Ok(ToolOutput::text(format!("File created successfully at: {path}"))
            .with_artifact(file_artifact(std::path::Path::new(&path), size, ArtifactSource::Isolated)))
    }

    async fn modify(&self, ctx: &ExecutionContext, input: ModifyInput) -> Result<ToolOutput, HiveError> {
        let path = self.container_path(&input.path);
        let current = self.exec_checked(ctx, format!("cat {}", quote(&path)), None).await?;
        let content = String::from_utf8_lossy(&current.stdout);
        let updated = replace_unique(&content, &input.old_str, &input.new_str).map_err(|reason| {
            HiveError::InvalidInput {
                tool: "str_replace".to_string(),
                reason,
            }
        })?;
        self.exec_checked(ctx, format!("cat > {}", quote(&path)), Some(updated.into_bytes()))
            .await?;
        Ok(ToolOutput::text(format!("Successfully replaced text in {path}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// 内存文件系统的假运行时：只认识本模块生成的几种脚本
    #[derive(Default)]
    struct FakeRuntime {
        files: Mutex<HashMap<String, Vec<u8>>>,
        requests: Mutex<Vec<ExecRequest>>,
    }

    fn unquote(s: &str) -> String {
        s.trim().trim_matches('\'').to_string()
    }

    #[async_trait]
    impl IsolatedRuntime for FakeRuntime {
        async fn start(&self, _ctx: &ExecutionContext, _session_id: &str) -> Result<String, HiveError> {
            Ok("fake".to_string())
        }

        async fn exec(&self, _runtime_id: &str, request: ExecRequest) -> Result<ExecOutput, HiveError> {
            self.requests.lock().await.push(request.clone());
            let script = request.argv[2].clone();
            let mut files = self.files.lock().await;
            let ok = |stdout: Vec<u8>| ExecOutput {
                exit_code: 0,
                stdout,
                stderr: Vec::new(),
            };
            if let Some(p) = script.strip_prefix("test -d ") {
                let dir = unquote(p);
                let is_dir = files.keys().any(|k| k.starts_with(&format!("{dir}/")));
                return Ok(ExecOutput {
                    exit_code: if is_dir { 0 } else { 1 },
                    ..Default::default()
                });
            }
            if let Some(p) = script.strip_prefix("cat > ") {
                files.insert(unquote(p), request.stdin.unwrap_or_default());
                return Ok(ok(Vec::new()));
            }
            if let Some((_, p)) = script.split_once("&& cat > ") {
                files.insert(unquote(p), request.stdin.unwrap_or_default());
                return Ok(ok(Vec::new()));
            }
            if let Some(p) = script.strip_prefix("cat ") {
                return Ok(match files.get(&unquote(p)) {
                    Some(bytes) => ok(bytes.clone()),
                    None => ExecOutput {
                        exit_code: 1,
                        stdout: Vec::new(),
                        stderr: b"No such file or directory".to_vec(),
                    },
                });
            }
            Ok(ok(format!("ran: {script}").into_bytes()))
        }

        async fn stop(&self, _runtime_id: &str) -> Result<(), HiveError> {
            Ok(())
        }
    }

    fn setup() -> (Arc<FakeRuntime>, ContainerHost, ExecutionContext) {
        let runtime = Arc::new(FakeRuntime::default());
        let host = ContainerHost::new(runtime.clone(), "/workspace", 10_000);
        let mut ctx = ExecutionContext::new("/skills", "/tmp/w");
        ctx.isolated_runtime_id = Some("fake".to_string());
        (runtime, host, ctx)
    }

    #[tokio::test]
    async fn test_requires_started_runtime() {
        let (_rt, host, mut ctx) = setup();
        ctx.isolated_runtime_id = None;
        let err = host
            .run(&ctx, RunInput { command: "ls".to_string(), description: None })
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::IsolatedRuntimeError { .. }));
    }

    #[tokio::test]
    async fn test_run_uses_workspace_and_env() {
        let (rt, host, mut ctx) = setup();
        ctx.env.insert("K".to_string(), "V".to_string());
        let out = host
            .run(&ctx, RunInput { command: "python3 /mnt/skills/pdf/run.py".to_string(), description: None })
            .await
            .unwrap();
        assert!(out.content.contains("ran: python3"));
        let requests = rt.requests.lock().await;
        assert_eq!(requests[0].workdir.as_deref(), Some("/workspace"));
        assert_eq!(requests[0].env.get("K").map(String::as_str), Some("V"));
    }

    #[tokio::test]
    async fn test_write_modify_read_roundtrip_inside_container() {
        let (_rt, host, ctx) = setup();
        let out = host
            .write(
                &ctx,
                WriteInput {
                    path: "out/it's.txt".to_string(),
                    file_text: "one\ntwo".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(out.artifacts[0].source, ArtifactSource::Isolated);
        assert_eq!(out.artifacts[0].id, "/workspace/out/it's.txt");

        host.modify(
            &ctx,
            ModifyInput {
                path: "/workspace/out/it's.txt".to_string(),
                old_str: "two".to_string(),
                new_str: "three".to_string(),
            },
        )
        .await
        .unwrap();

        let view = host
            .read(&ctx, ReadInput { path: "out/it's.txt".to_string(), view_range: None })
            .await
            .unwrap();
        assert!(view.content.contains("2\tthree"));
    }

    #[tokio::test]
    async fn test_missing_file_is_execution_failed() {
        let (_rt, host, ctx) = setup();
        let err = host
            .read(&ctx, ReadInput { path: "nope.txt".to_string(), view_range: None })
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::ExecutionFailed { exit_code: 1, .. }));
    }
}
