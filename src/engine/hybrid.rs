//! 混合路由：一个会话跨多个后端
//!
//! 建会话时为每个子会话的工具生成带前缀的名字 `<skill>_<op>`，得到只读的路由表与合并后的工具目录。
//! 一轮中的调用按目标子会话分组，每组一个并发单元（组内由该子会话的执行器并发执行），
//! 分发前还原原始工具名；结果仍按请求顺序、以模型调用时的 id 回传。
//! 输入中的 `artifact://<id>` 会被改写为目标后端看得到的路径（托管产物经缓存拉取）。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;

use crate::artifacts::{ArtifactCache, ArtifactLedger, ArtifactRef, ArtifactSource};
use crate::core::HiveError;
use crate::engine::loop_::RoundDispatch;
use crate::llm::ToolDefinition;
use crate::sandbox::ExecutionContext;
use crate::session::Mode;
use crate::skills::Skill;
use crate::tools::{ToolCall, ToolExecutor, ToolKind, ToolOutcome};

/// 产物引用前缀
pub const ARTIFACT_SCHEME: &str = "artifact://";

/// 暂存托管产物的子目录（位于目标后端的工作目录下）
pub const STAGING_DIR: &str = ".hive_artifacts";

/// 带前缀工具名的路由目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub mode: Mode,
    /// 子会话自己的工具名
    pub tool_name: String,
    /// 注册该工具的技能 / 能力名
    pub skill: String,
}

/// 路由表：建好后只读
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: BTreeMap<String, RouteTarget>,
    catalog: Vec<ToolDefinition>,
}

impl RoutingTable {
    fn insert(&mut self, definition: ToolDefinition, target: RouteTarget) -> Result<(), HiveError> {
        if self.routes.contains_key(&definition.name) {
            return Err(HiveError::Config(format!(
                "tool name '{}' is produced by more than one skill",
                definition.name
            )));
        }
        self.routes.insert(definition.name.clone(), target);
        self.catalog.push(definition);
        Ok(())
    }

    /// 本机 / 容器子会话：每个技能四个工具；没有技能时以模式名为前缀
    pub(crate) fn add_packages(&mut self, mode: Mode, skills: &[Skill]) -> Result<(), HiveError> {
        let owners: Vec<String> = if skills.is_empty() {
            vec![mode.to_string()]
        } else {
            skills.iter().map(|s| s.name.clone()).collect()
        };
        for owner in owners {
            for kind in ToolKind::ALL {
                let definition = ToolDefinition {
                    name: kind.prefixed_name(&owner),
                    description: format!("{} Runs on the {mode} backend for '{owner}'.", kind.description()),
                    input_schema: kind.input_schema(),
                };
                self.insert(
                    definition,
                    RouteTarget {
                        mode,
                        tool_name: kind.tool_name().to_string(),
                        skill: owner.clone(),
                    },
                )?;
            }
        }
        Ok(())
    }

    /// 进程内子会话：工具名本身已是 `<capability>_<op>`，原样进入路由表
    pub(crate) fn add_native(&mut self, catalog: &[ToolDefinition]) -> Result<(), HiveError> {
        for definition in catalog {
            let skill = definition
                .name
                .rsplit_once('_')
                .map_or(definition.name.as_str(), |(owner, _)| owner)
                .to_string();
            self.insert(
                definition.clone(),
                RouteTarget {
                    mode: Mode::Native,
                    tool_name: definition.name.clone(),
                    skill,
                },
            )?;
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<&RouteTarget> {
        self.routes.get(name)
    }

    pub fn catalog(&self) -> &[ToolDefinition] {
        &self.catalog
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// 执行端看到的路径形态
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PathView {
    Host,
    /// 工作目录挂载在容器内的该路径
    Container { workspace_mount: String },
}

/// 一个参与本轮的子会话
pub(crate) struct Group<'a> {
    pub executor: &'a ToolExecutor,
    pub ctx: &'a ExecutionContext,
    pub view: PathView,
}

pub(crate) struct HybridRound<'a> {
    pub routes: &'a RoutingTable,
    pub groups: BTreeMap<Mode, Group<'a>>,
    pub cache: Option<&'a ArtifactCache>,
}

impl HybridRound<'_> {
    async fn run_group(
        &self,
        mode: Mode,
        items: Vec<(usize, ToolCall)>,
        ledger: &ArtifactLedger,
    ) -> Result<Vec<(usize, ToolOutcome)>, HiveError> {
        let Some(group) = self.groups.get(&mode) else {
            let err = HiveError::DispatchFailed {
                tool_name: mode.to_string(),
                reason: "backend not part of this session".to_string(),
            };
            return Ok(items
                .into_iter()
                .map(|(i, call)| (i, ToolOutcome::failed(call.id, &err)))
                .collect());
        };

        let mut done = Vec::new();
        let mut ready = Vec::new();
        for (i, call) in items {
            match self.rewrite_artifact_refs(call.clone(), group, ledger).await {
                Ok(call) => ready.push((i, call)),
                Err(e) if e.is_recoverable() => done.push((i, ToolOutcome::failed(call.id, &e))),
                Err(e) => return Err(e),
            }
        }
        let calls: Vec<ToolCall> = ready.iter().map(|(_, c)| c.clone()).collect();
        tracing::debug!(%mode, calls = calls.len(), "hybrid group dispatch");
        let outcomes = group.executor.execute_all(group.ctx, &calls).await?;
        done.extend(ready.into_iter().map(|(i, _)| i).zip(outcomes));
        Ok(done)
    }

    /// 把输入里的 `artifact://<id>` 换成目标后端可见的路径
    async fn rewrite_artifact_refs(
        &self,
        mut call: ToolCall,
        group: &Group<'_>,
        ledger: &ArtifactLedger,
    ) -> Result<ToolCall, HiveError> {
        let mut ids = Vec::new();
        for value in call.input.values() {
            collect_refs(value, &mut ids);
        }
        if ids.is_empty() {
            return Ok(call);
        }
        let mut resolved = HashMap::new();
        for id in ids {
            let artifact = ledger.get(&id).ok_or_else(|| HiveError::ArtifactUnavailable {
                id: id.clone(),
                reason: "not recorded in this session".to_string(),
            })?;
            let path = self.locate(artifact, group).await?;
            resolved.insert(id, path);
        }
        for value in call.input.values_mut() {
            replace_refs(value, &resolved);
        }
        Ok(call)
    }

    async fn locate(&self, artifact: &ArtifactRef, group: &Group<'_>) -> Result<String, HiveError> {
        let unavailable = |reason: &str| HiveError::ArtifactUnavailable {
            id: artifact.id.clone(),
            reason: reason.to_string(),
        };
        match artifact.source {
            ArtifactSource::Hosted => {
                let cache = self
                    .cache
                    .ok_or_else(|| unavailable("no artifact cache configured for hosted files"))?;
                let staged = cache
                    .stage_into(artifact, &group.ctx.working_dir.join(STAGING_DIR))
                    .await?;
                match &group.view {
                    PathView::Host => Ok(staged.display().to_string()),
                    PathView::Container { workspace_mount } => staged
                        .strip_prefix(&group.ctx.working_dir)
                        .map(|rel| format!("{}/{}", workspace_mount.trim_end_matches('/'), rel.display()))
                        .map_err(|_| unavailable("staged file is outside the sandbox working directory")),
                }
            }
            ArtifactSource::Local => match &group.view {
                PathView::Host => Ok(artifact.id.clone()),
                PathView::Container { workspace_mount } => Path::new(&artifact.id)
                    .strip_prefix(&group.ctx.working_dir)
                    .map(|rel| format!("{}/{}", workspace_mount.trim_end_matches('/'), rel.display()))
                    .map_err(|_| unavailable("file is outside the sandbox working directory")),
            },
            ArtifactSource::Isolated => match &group.view {
                PathView::Container { .. } => Ok(artifact.id.clone()),
                PathView::Host => self
                    .container_to_host(&artifact.id)
                    .map(|p| p.display().to_string())
                    .ok_or_else(|| unavailable("file is not under a mounted sandbox directory")),
            },
        }
    }

    /// 容器内路径 → 宿主路径（经由沙箱子会话的工作目录挂载）
    fn container_to_host(&self, path: &str) -> Option<PathBuf> {
        self.groups.values().find_map(|g| match &g.view {
            PathView::Container { workspace_mount } => Path::new(path)
                .strip_prefix(workspace_mount)
                .ok()
                .map(|rel| g.ctx.working_dir.join(rel)),
            PathView::Host => None,
        })
    }
}

/// 字符串中所有 `artifact://<id>` 的 (起点, 终点, id)；id 到空白或引号为止
fn find_refs(s: &str) -> Vec<(usize, usize, &str)> {
    let mut found = Vec::new();
    let mut offset = 0;
    while let Some(pos) = s[offset..].find(ARTIFACT_SCHEME) {
        let start = offset + pos;
        let id_start = start + ARTIFACT_SCHEME.len();
        let id_end = s[id_start..]
            .find(|c: char| c.is_whitespace() || c == '"' || c == '\'')
            .map_or(s.len(), |n| id_start + n);
        if id_end > id_start {
            found.push((start, id_end, &s[id_start..id_end]));
        }
        offset = id_end.max(id_start);
    }
    found
}

fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for (_, _, id) in find_refs(s) {
                if !out.iter().any(|x| x == id) {
                    out.push(id.to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

fn replace_refs(value: &mut Value, resolved: &HashMap<String, String>) {
    match value {
        Value::String(s) => {
            let refs = find_refs(s);
            if refs.is_empty() {
                return;
            }
            let mut out = String::with_capacity(s.len());
            let mut last = 0;
            for (start, end, id) in refs {
                out.push_str(&s[last..start]);
                match resolved.get(id) {
                    Some(path) => out.push_str(path),
                    None => out.push_str(&s[start..end]),
                }
                last = end;
            }
            out.push_str(&s[last..]);
            *s = out;
        }
        Value::Array(items) => items.iter_mut().for_each(|v| replace_refs(v, resolved)),
        Value::Object(map) => map.values_mut().for_each(|v| replace_refs(v, resolved)),
        _ => {}
    }
}

#[async_trait]
impl RoundDispatch for HybridRound<'_> {
    async fn dispatch_round(
        &self,
        calls: &[ToolCall],
        ledger: &ArtifactLedger,
    ) -> Result<Vec<ToolOutcome>, HiveError> {
        let mut outcomes: Vec<Option<ToolOutcome>> = vec![None; calls.len()];
        let mut grouped: BTreeMap<Mode, Vec<(usize, ToolCall)>> = BTreeMap::new();
        for (i, call) in calls.iter().enumerate() {
            match self.routes.resolve(&call.name) {
                Some(target) => grouped
                    .entry(target.mode)
                    .or_default()
                    .push((i, call.renamed(target.tool_name.clone()))),
                None => {
                    let err = HiveError::DispatchFailed {
                        tool_name: call.name.clone(),
                        reason: "unknown tool".to_string(),
                    };
                    outcomes[i] = Some(ToolOutcome::failed(call.id.clone(), &err));
                }
            }
        }

        let groups = grouped
            .into_iter()
            .map(|(mode, items)| self.run_group(mode, items, ledger));
        for group in join_all(groups).await {
            for (i, outcome) in group? {
                outcomes[i] = Some(outcome);
            }
        }

        Ok(outcomes
            .into_iter()
            .zip(calls)
            .map(|(outcome, call)| {
                outcome.unwrap_or_else(|| {
                    let err = HiveError::DispatchFailed {
                        tool_name: call.name.clone(),
                        reason: "no result produced".to_string(),
                    };
                    ToolOutcome::failed(call.id.clone(), &err)
                })
            })
            .collect())
    }
}
