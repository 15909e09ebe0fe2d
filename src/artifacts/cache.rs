//! 跨后端产物缓存
//!
//! 托管执行产生的文件只在远端存在；当另一个后端（本机 / 容器）需要用到它时，按 id 拉取一次并缓存在本地。
//! 缓存有显式的淘汰策略：容量上限 + TTL，条目被淘汰时删除对应的本地文件。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::sync::Cache;
use serde::Deserialize;

use crate::artifacts::{ArtifactRef, ArtifactSource, ArtifactStore, RemoteFiles};
use crate::core::HiveError;

/// [artifacts] 段：缓存目录、容量上限、TTL
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactCacheConfig {
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_max_entries() -> u64 {
    64
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for ArtifactCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

/// 按产物 id 缓存的本地副本
pub struct ArtifactCache {
    store: Arc<dyn ArtifactStore>,
    remote: Arc<dyn RemoteFiles>,
    entries: Cache<String, PathBuf>,
}

impl ArtifactCache {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        remote: Arc<dyn RemoteFiles>,
        config: &ArtifactCacheConfig,
    ) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries.max(1))
            .time_to_live(Duration::from_secs(config.ttl_secs.max(1)))
            .eviction_listener(|id: Arc<String>, path: PathBuf, cause| {
                if cause == RemovalCause::Replaced {
                    return;
                }
                tracing::debug!(artifact = %id, path = %path.display(), ?cause, "artifact cache evict");
                let _ = std::fs::remove_file(&path);
                if let Some(parent) = path.parent() {
                    // 仅当目录已空时才会成功
                    let _ = std::fs::remove_dir(parent);
                }
            })
            .build();
        Self {
            store,
            remote,
            entries,
        }
    }

    /// 取得托管产物的本地路径：命中缓存且文件仍在时直接返回，否则下载并写入存储
    pub async fn fetch(&self, artifact: &ArtifactRef) -> Result<PathBuf, HiveError> {
        if artifact.source != ArtifactSource::Hosted {
            return Err(HiveError::ArtifactUnavailable {
                id: artifact.id.clone(),
                reason: "only hosted artifacts are fetched through the cache".to_string(),
            });
        }
        if let Some(path) = self.entries.get(&artifact.id) {
            if path.exists() {
                return Ok(path);
            }
            self.entries.invalidate(&artifact.id);
        }

        let unavailable = |reason: String| HiveError::ArtifactUnavailable {
            id: artifact.id.clone(),
            reason,
        };
        let file = self
            .remote
            .download(&artifact.id)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let filename = artifact
            .filename
            .clone()
            .or(file.filename)
            .map(|f| file_name_only(&f))
            .unwrap_or_else(|| sanitize(&artifact.id));
        let rel = format!("{}/{}", sanitize(&artifact.id), filename);
        let stored = self
            .store
            .write(&rel, &file.bytes)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let path = self.store.local_path().join(stored);
        tracing::info!(artifact = %artifact.id, path = %path.display(), bytes = file.bytes.len(), "artifact fetched");
        self.entries.insert(artifact.id.clone(), path.clone());
        Ok(path)
    }

    /// 拉取后复制到目标目录（执行端可见的位置）下的 `<id>/<filename>`，返回目标路径。
    /// 按 id 分目录，同名的不同产物互不覆盖
    pub async fn stage_into(&self, artifact: &ArtifactRef, dest_dir: &Path) -> Result<PathBuf, HiveError> {
        let cached = self.fetch(artifact).await?;
        let name = cached
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| sanitize(&artifact.id));
        let dir = dest_dir.join(sanitize(&artifact.id));
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(name);
        tokio::fs::copy(&cached, &dest).await?;
        Ok(dest)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// 立即执行挂起的淘汰任务（TTL 到期等）
    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
    }

    /// 清空缓存并释放存储
    pub async fn cleanup(&self) -> Result<(), HiveError> {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
        self.store
            .cleanup()
            .await
            .map_err(|e| HiveError::Config(format!("artifact store cleanup failed: {e}")))
    }
}

fn file_name_only(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| sanitize(name))
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{LocalStore, RemoteFile};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRemote {
        downloads: AtomicUsize,
    }

    #[async_trait]
    impl RemoteFiles for CountingRemote {
        async fn download(&self, file_id: &str) -> anyhow::Result<RemoteFile> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if file_id == "missing" {
                anyhow::bail!("404");
            }
            Ok(RemoteFile {
                filename: Some("chart.png".to_string()),
                bytes: format!("bytes of {file_id}").into_bytes(),
            })
        }

        async fn delete(&self, _file_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn cache(dir: &Path, remote: Arc<CountingRemote>) -> ArtifactCache {
        ArtifactCache::new(
            Arc::new(LocalStore::new(dir.join("cache"))),
            remote,
            &ArtifactCacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_fetch_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(CountingRemote {
            downloads: AtomicUsize::new(0),
        });
        let cache = cache(dir.path(), remote.clone());
        let artifact = ArtifactRef::new("file_01", ArtifactSource::Hosted);

        let first = cache.fetch(&artifact).await.unwrap();
        let second = cache.fetch(&artifact).await.unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with("file_01/chart.png"));
        assert_eq!(remote.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_hosted_and_reports_download_errors() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(CountingRemote {
            downloads: AtomicUsize::new(0),
        });
        let cache = cache(dir.path(), remote);

        let local = ArtifactRef::new("/tmp/a.txt", ArtifactSource::Local);
        assert!(matches!(
            cache.fetch(&local).await,
            Err(HiveError::ArtifactUnavailable { .. })
        ));

        let missing = ArtifactRef::new("missing", ArtifactSource::Hosted);
        let err = cache.fetch(&missing).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_invalidate_removes_cached_file() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(CountingRemote {
            downloads: AtomicUsize::new(0),
        });
        let cache = cache(dir.path(), remote);
        let artifact = ArtifactRef::new("file_02", ArtifactSource::Hosted);
        let path = cache.fetch(&artifact).await.unwrap();
        assert!(path.exists());

        cache.entries.invalidate(&artifact.id);
        cache.run_pending_tasks();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stage_into_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(CountingRemote {
            downloads: AtomicUsize::new(0),
        });
        let cache = cache(dir.path(), remote);
        let artifact = ArtifactRef::new("file_03", ArtifactSource::Hosted);
        let staged = cache
            .stage_into(&artifact, &dir.path().join("work/.artifacts"))
            .await
            .unwrap();
        assert!(staged.ends_with("work/.artifacts/file_03/chart.png"));
        assert_eq!(std::fs::read_to_string(staged).unwrap(), "bytes of file_03");
    }

    #[tokio::test]
    async fn test_same_filename_staged_apart() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(CountingRemote {
            downloads: AtomicUsize::new(0),
        });
        let cache = cache(dir.path(), remote);
        let dest = dir.path().join("work/.artifacts");
        let a = cache
            .stage_into(&ArtifactRef::new("file_a", ArtifactSource::Hosted), &dest)
            .await
            .unwrap();
        let b = cache
            .stage_into(&ArtifactRef::new("file_b", ArtifactSource::Hosted), &dest)
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read_to_string(a).unwrap(), "bytes of file_a");
        assert_eq!(std::fs::read_to_string(b).unwrap(), "bytes of file_b");
    }
}
