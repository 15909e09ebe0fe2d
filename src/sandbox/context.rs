//! 执行上下文与路径边界校验
//!
//! ExecutionContext 是单个会话独占的执行配置；validate_path 保证本机（无沙箱）执行触碰的每个路径
//! 都落在白名单根目录之下。比较前先规范化（展开为绝对路径、消解 `.` / `..`、解析符号链接），
//! 从不靠字符串匹配 `..` 来拦截逃逸。

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::core::HiveError;

/// 默认单次工具调用超时（毫秒）
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// 会话的执行配置
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub skills_root: PathBuf,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout_ms: u64,
    /// 为空表示显式放开限制（见 allow_all）
    pub allowed_paths: Vec<PathBuf>,
    /// 已启动的隔离运行时标识
    pub isolated_runtime_id: Option<String>,
    /// 透传给隔离运行时启动器的配置
    pub executor_config: HashMap<String, Value>,
}

impl ExecutionContext {
    /// 白名单默认为 {skills_root, working_dir}
    pub fn new(skills_root: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        let skills_root = skills_root.into();
        let working_dir = working_dir.into();
        Self {
            allowed_paths: vec![skills_root.clone(), working_dir.clone()],
            skills_root,
            working_dir,
            env: HashMap::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            isolated_runtime_id: None,
            executor_config: HashMap::new(),
        }
    }

    /// 设置白名单；传入空列表时保持默认的 {skills_root, working_dir}
    pub fn with_allowed_paths(mut self, paths: Vec<PathBuf>) -> Self {
        if paths.is_empty() {
            self.allowed_paths = vec![self.skills_root.clone(), self.working_dir.clone()];
        } else {
            self.allowed_paths = paths;
        }
        self
    }

    /// 显式放开路径限制：清空白名单后 validate_path 接受任意路径。
    /// 只能通过这个方法得到空白名单，省略参数永远不会得到「全部允许」。
    pub fn allow_all(mut self) -> Self {
        self.allowed_paths.clear();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_executor_config(mut self, config: HashMap<String, Value>) -> Self {
        self.executor_config = config;
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allowed_paths.is_empty()
    }

    /// 相对路径以 working_dir 为基准展开
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

/// 校验路径：规范化后等于某个白名单根，或是其后代时返回规范化路径
pub fn validate_path(ctx: &ExecutionContext, path: impl AsRef<Path>) -> Result<PathBuf, HiveError> {
    let normalized = resolve(&ctx.absolute(path.as_ref()));
    if ctx.is_unrestricted() {
        return Ok(normalized);
    }
    let allowed = ctx
        .allowed_paths
        .iter()
        .map(|root| resolve(&ctx.absolute(root)))
        .any(|root| normalized == root || normalized.starts_with(&root));
    if allowed {
        Ok(normalized)
    } else {
        Err(HiveError::PathNotAllowed {
            path: normalized,
            allowed_paths: ctx.allowed_paths.clone(),
        })
    }
}

/// 纯词法规范化：消解 `.` 与 `..`，不访问文件系统
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// 规范化并解析符号链接；尚不存在的尾部（如待创建的文件）保持词法形式拼接在
/// 最深的已存在祖先之后
fn resolve(path: &Path) -> PathBuf {
    let lexical = normalize_lexically(path);
    let mut existing = lexical.clone();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for name in tail.iter().rev() {
                out.push(name);
            }
            return out;
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return lexical,
        }
    }
}
