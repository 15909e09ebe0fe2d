//! 执行产物账本
//!
//! 每个会话持有一份只追加的产物账本，记录工具写出的文件或托管执行报告的文件引用，
//! 并标注真实来源后端，供跨后端解析时按需拉取。

mod cache;
mod remote;
mod store;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ContentBlock;

pub use cache::{ArtifactCache, ArtifactCacheConfig};
pub use remote::{RemoteFile, RemoteFiles};
pub use store::{ArtifactStore, LocalStore};

/// 产物来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    /// 本机（含进程内能力）写出的文件，id 为宿主路径
    Local,
    /// 隔离运行时内写出的文件，id 为容器内路径
    Isolated,
    /// 托管执行产生的文件，id 为远端文件标识
    Hosted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub source: ArtifactSource,
}

impl ArtifactRef {
    pub fn new(id: impl Into<String>, source: ArtifactSource) -> Self {
        Self {
            id: id.into(),
            filename: None,
            size: None,
            source,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// 只追加的产物账本；同一 (id, source) 只记录一次
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactLedger {
    entries: Vec<ArtifactRef>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条记录；已存在时返回 false
    pub fn record(&mut self, artifact: ArtifactRef) -> bool {
        if self
            .entries
            .iter()
            .any(|a| a.id == artifact.id && a.source == artifact.source)
        {
            return false;
        }
        self.entries.push(artifact);
        true
    }

    pub fn extend(&mut self, artifacts: impl IntoIterator<Item = ArtifactRef>) -> Vec<ArtifactRef> {
        artifacts
            .into_iter()
            .filter(|a| self.record(a.clone()))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&ArtifactRef> {
        self.entries.iter().find(|a| a.id == id)
    }

    pub fn entries(&self) -> &[ArtifactRef] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 从托管执行返回的内容块中收集文件引用（任意层级带 file_id 的对象）
pub fn collect_hosted_files(blocks: &[ContentBlock]) -> Vec<ArtifactRef> {
    let mut found = Vec::new();
    for block in blocks {
        if let ContentBlock::Other(value) = block {
            walk_file_ids(value, &mut found);
        }
    }
    found
}

fn walk_file_ids(value: &Value, out: &mut Vec<ArtifactRef>) {
    match value {
        Value::Object(map) => {
            if let Some(id) = map.get("file_id").and_then(|v| v.as_str()) {
                if !out.iter().any(|a| a.id == id) {
                    let mut artifact = ArtifactRef::new(id, ArtifactSource::Hosted);
                    artifact.filename = map
                        .get("filename")
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    artifact.size = map
                        .get("size_bytes")
                        .or_else(|| map.get("size"))
                        .and_then(|v| v.as_u64());
                    out.push(artifact);
                }
            }
            for v in map.values() {
                walk_file_ids(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                walk_file_ids(v, out);
            }
        }
        _ => {}
    }
}
