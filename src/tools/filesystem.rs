//! 本机文件系统操作（view / create_file / str_replace）
//!
//! SafeFs 绑定会话的 ExecutionContext，所有路径先经 validate_path 校验必须落在白名单根目录下
//! （禁止 ../ 与符号链接逃逸），再触碰文件系统。文本处理函数（行号、唯一替换、截断）与容器端共用。

use std::path::Path;

use walkdir::WalkDir;

use crate::artifacts::{ArtifactRef, ArtifactSource};
use crate::core::HiveError;
use crate::sandbox::{validate_path, ExecutionContext};
use crate::tools::schema::{ModifyInput, ReadInput, WriteInput};
use crate::tools::ToolOutput;

/// 默认输出截断字节数
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 30_000;

/// 沙箱文件系统：绑定会话上下文，所有路径在操作前校验
#[derive(Debug, Clone, Copy)]
pub struct SafeFs<'a> {
    ctx: &'a ExecutionContext,
    max_output_bytes: usize,
}

impl<'a> SafeFs<'a> {
    pub fn new(ctx: &'a ExecutionContext, max_output_bytes: usize) -> Self {
        Self {
            ctx,
            max_output_bytes,
        }
    }

    pub async fn view(&self, input: &ReadInput) -> Result<ToolOutput, HiveError> {
        let path = validate_path(self.ctx, &input.path)?;
        let meta = tokio::fs::metadata(&path).await?;
        let content = if meta.is_dir() {
            list_dir(&path)
        } else {
            let raw = tokio::fs::read(&path).await?;
            let text = String::from_utf8_lossy(&raw);
            number_lines(&text, input.view_range).map_err(|reason| HiveError::InvalidInput {
                tool: "view".to_string(),
                reason,
            })?
        };
        Ok(ToolOutput::text(truncate_output(content, self.max_output_bytes)))
    }

    pub async fn create(&self, input: &WriteInput) -> Result<ToolOutput, HiveError> {
        let path = validate_path(self.ctx, &input.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, input.file_text.as_bytes()).await?;
        let size = input.file_text.len() as u64;
        tracing::info!(path = %path.display(), size, "file created");
        Ok(
            ToolOutput::text(format!("File created successfully at: {}", path.display()))
                .with_artifact(file_artifact(&path, size, ArtifactSource::Local)),
        )
    }

    pub async fn str_replace(&self, input: &ModifyInput) -> Result<ToolOutput, HiveError> {
        let path = validate_path(self.ctx, &input.path)?;
        let content = tokio::fs::read_to_string(&path).await?;
        let updated = replace_unique(&content, &input.old_str, &input.new_str).map_err(|reason| {
            HiveError::InvalidInput {
                tool: "str_replace".to_string(),
                reason,
            }
        })?;
        tokio::fs::write(&path, updated.as_bytes()).await?;
        Ok(ToolOutput::text(format!("Successfully replaced text in {}", path.display())))
    }
}

pub(crate) fn file_artifact(path: &Path, size: u64, source: ArtifactSource) -> ArtifactRef {
    let mut artifact = ArtifactRef::new(path.display().to_string(), source).with_size(size);
    artifact.filename = path.file_name().map(|n| n.to_string_lossy().to_string());
    artifact
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// 列出目录，最多两级，跳过隐藏项
fn list_dir(root: &Path) -> String {
    let mut lines = vec![format!("{}/", root.display())];
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .flatten()
    {
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let suffix = if entry.file_type().is_dir() { "/" } else { "" };
        lines.push(format!("  {}{}", rel.display(), suffix));
    }
    lines.join("\n")
}

/// 带行号输出；range 为 [start, end]，从 1 开始，end = -1 表示到末尾
pub(crate) fn number_lines(content: &str, range: Option<[i64; 2]>) -> Result<String, String> {
    let lines: Vec<&str> = content.lines().collect();
    let (start, end) = match range {
        None => (1, lines.len()),
        Some([start, end]) => {
            if start < 1 || (!lines.is_empty() && start as usize > lines.len()) {
                return Err(format!(
                    "invalid view_range start {start}: file has {} lines",
                    lines.len()
                ));
            }
            let end = if end == -1 {
                lines.len()
            } else if end < start {
                return Err(format!("invalid view_range: end {end} < start {start}"));
            } else {
                (end as usize).min(lines.len())
            };
            (start as usize, end)
        }
    };
    Ok(lines
        .iter()
        .enumerate()
        .skip(start.saturating_sub(1))
        .take(end.saturating_sub(start.saturating_sub(1)))
        .map(|(i, line)| format!("{:>6}\t{}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// old 必须恰好出现一次
pub(crate) fn replace_unique(content: &str, old: &str, new: &str) -> Result<String, String> {
    if old.is_empty() {
        return Err("old_str must not be empty".to_string());
    }
    match content.matches(old).count() {
        0 => Err("old_str not found in file".to_string()),
        1 => Ok(content.replacen(old, new, 1)),
        n => Err(format!(
            "old_str appears {n} times in file; include more context to make it unique"
        )),
    }
}

/// 超过 max 字节时在字符边界截断并追加标记
pub(crate) fn truncate_output(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... [output truncated: {} of {} bytes shown]", &s[..cut], cut, s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &Path) -> ExecutionContext {
        let work = dir.join("work");
        std::fs::create_dir_all(&work).unwrap();
        ExecutionContext::new(dir.join("skills"), work)
    }

    #[test]
    fn test_number_lines_range() {
        let text = "a\nb\nc\nd";
        assert_eq!(number_lines(text, None).unwrap().lines().count(), 4);
        let part = number_lines(text, Some([2, 3])).unwrap();
        assert_eq!(part, "     2\tb\n     3\tc");
        let tail = number_lines(text, Some([3, -1])).unwrap();
        assert!(tail.contains("4\td"));
        assert!(number_lines(text, Some([0, 2])).is_err());
        assert!(number_lines(text, Some([3, 2])).is_err());
    }

    #[test]
    fn test_replace_unique() {
        assert_eq!(replace_unique("x = 1", "1", "2").unwrap(), "x = 2");
        assert!(replace_unique("a a", "a", "b").unwrap_err().contains("2 times"));
        assert!(replace_unique("abc", "z", "y").is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "日本語".repeat(10);
        let out = truncate_output(s, 4);
        assert!(out.starts_with("日"));
        assert!(out.contains("truncated"));
        assert_eq!(truncate_output("short".to_string(), 100), "short");
    }

    #[tokio::test]
    async fn test_create_view_replace() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let fs = SafeFs::new(&ctx, DEFAULT_MAX_OUTPUT_BYTES);

        let out = fs
            .create(&WriteInput {
                path: "out/hello.txt".to_string(),
                file_text: "hello\nworld".to_string(),
                description: None,
            })
            .await
            .unwrap();
        assert_eq!(out.artifacts.len(), 1);
        assert_eq!(out.artifacts[0].filename.as_deref(), Some("hello.txt"));
        assert_eq!(out.artifacts[0].size, Some(11));

        fs.str_replace(&ModifyInput {
            path: "out/hello.txt".to_string(),
            old_str: "world".to_string(),
            new_str: "hive".to_string(),
        })
        .await
        .unwrap();

        let view = fs
            .view(&ReadInput {
                path: "out/hello.txt".to_string(),
                view_range: None,
            })
            .await
            .unwrap();
        assert!(view.content.contains("2\thive"));

        let listing = fs
            .view(&ReadInput {
                path: ".".to_string(),
                view_range: None,
            })
            .await
            .unwrap();
        assert!(listing.content.contains("out/"));
        assert!(listing.content.contains("hello.txt"));
    }

    #[tokio::test]
    async fn test_escape_is_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let fs = SafeFs::new(&ctx, DEFAULT_MAX_OUTPUT_BYTES);
        let err = fs
            .create(&WriteInput {
                path: "../../escape.txt".to_string(),
                file_text: "x".to_string(),
                description: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::PathNotAllowed { .. }));
        assert!(!dir.path().join("escape.txt").exists());
    }
}
