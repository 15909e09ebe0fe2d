//! 本机命令执行
//!
//! 通过 sh -c（Windows 上 cmd /C）在会话工作目录中运行命令，注入会话环境变量。
//! 子进程设置 kill_on_drop：调用方的超时丢弃 future 时子进程随之被杀掉。

use std::process::Stdio;

use tokio::process::Command;

use crate::core::HiveError;
use crate::sandbox::{validate_path, ExecutionContext};
use crate::tools::filesystem::truncate_output;
use crate::tools::ToolOutput;

/// 合并 stdout 与 stderr 作为模型看到的输出
pub(crate) fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout.trim_end().to_string(),
        (true, false) => format!("stderr: {}", stderr.trim_end()),
        (false, false) => format!("{}\nstderr: {}", stdout.trim_end(), stderr.trim_end()),
    }
}

/// 在工作目录中运行命令；非 0 退出码转为 ExecutionFailed
pub async fn run_command(
    ctx: &ExecutionContext,
    command: &str,
    max_output_bytes: usize,
) -> Result<ToolOutput, HiveError> {
    let command = command.trim();
    if command.is_empty() {
        return Err(HiveError::InvalidInput {
            tool: "bash_tool".to_string(),
            reason: "empty command".to_string(),
        });
    }
    let cwd = validate_path(ctx, &ctx.working_dir)?;
    tracing::info!(command = %command, cwd = %cwd.display(), "shell command execute");

    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    };
    let output = cmd
        .current_dir(&cwd)
        .envs(&ctx.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    let combined = truncate_output(combine_output(&output.stdout, &output.stderr), max_output_bytes);
    if !output.status.success() {
        return Err(HiveError::ExecutionFailed {
            command: command.to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        });
    }
    Ok(ToolOutput::text(combined))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn ctx() -> (tempfile::TempDir, ExecutionContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), dir.path());
        (dir, ctx)
    }

    #[tokio::test]
    async fn test_runs_in_working_dir_with_env() {
        let (dir, mut ctx) = ctx();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        ctx.env.insert("HIVE_TEST_VAR".to_string(), "bee".to_string());
        let out = run_command(&ctx, "ls && echo $HIVE_TEST_VAR", 1000).await.unwrap();
        assert!(out.content.contains("marker.txt"));
        assert!(out.content.contains("bee"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_execution_failed() {
        let (_dir, ctx) = ctx();
        let err = run_command(&ctx, "echo oops >&2; exit 3", 1000).await.unwrap_err();
        match err {
            HiveError::ExecutionFailed {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, 3);
                assert!(output.contains("oops"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let (_dir, ctx) = ctx();
        assert!(matches!(
            run_command(&ctx, "  ", 1000).await,
            Err(HiveError::InvalidInput { .. })
        ));
    }
}
