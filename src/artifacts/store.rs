//! 产物存储接口
//!
//! 持久化 / 对象存储后端及其请求签名不在本 crate 内，编排层只调用 write / local_path / cleanup。
//! LocalStore 是落在本地目录上的默认实现。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// 写入字节，返回存储内引用（相对路径）
    async fn write(&self, path: &str, bytes: &[u8]) -> anyhow::Result<String>;

    /// 存储在本机可见的根目录
    fn local_path(&self) -> PathBuf;

    async fn cleanup(&self) -> anyhow::Result<()>;
}

/// 本地目录存储
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn write(&self, path: &str, bytes: &[u8]) -> anyhow::Result<String> {
        let rel = Path::new(path);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("store path must be relative without traversal: {path}");
        }
        let full = self.root.join(rel);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        Ok(path.to_string())
    }

    fn local_path(&self) -> PathBuf {
        self.root.clone()
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        if tokio::fs::try_exists(&self.root).await? {
            tokio::fs::remove_dir_all(&self.root).await?;
        }
        Ok(())
    }
}
