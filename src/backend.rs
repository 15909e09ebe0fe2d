//! 后端：{模式, new_session, chat}
//!
//! 调用方只需换一个 Backend 构造会话，就能切换执行端；chat 的调用点不变。
//! HybridBuilder 把多个后端组合进一个会话。

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::artifacts::{ArtifactCache, RemoteFiles};
use crate::core::{HiveError, TaskScheduler};
use crate::engine::hybrid::PathView;
use crate::engine::RoutingTable;
use crate::llm::{ContainerRequest, MessageContent, ModelClient, ModelRequest};
use crate::native::{CapabilityRegistry, NativeDispatch};
use crate::sandbox::{ContainerHost, ExecutionContext, IsolatedRuntime};
use crate::session::{
    ChatOptions, ChatResponse, DirectState, HostedState, HybridState, Mode, ModeState, Session,
    SessionOptions, TurnFailure,
};
use crate::skills::{skills_system_prompt, HostedSkill, Skill, SkillMount, SkillSet};
use crate::tools::{direct_catalog, HostDispatch, LocalHost, ToolDispatch, ToolExecutor};

/// 执行端
#[derive(Clone)]
pub enum Backend {
    /// 本机直接执行，路径受白名单约束
    Local,
    /// 在隔离运行时（容器）中执行
    Sandboxed(Arc<dyn IsolatedRuntime>),
    /// 远端托管执行；配置 RemoteFiles 后 cleanup 会删除远端产物
    Hosted(Option<Arc<dyn RemoteFiles>>),
    /// 进程内能力
    Native(Arc<CapabilityRegistry>),
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backend({})", self.mode())
    }
}

impl Backend {
    pub fn mode(&self) -> Mode {
        match self {
            Backend::Local => Mode::Local,
            Backend::Sandboxed(_) => Mode::Sandboxed,
            Backend::Hosted(_) => Mode::Hosted,
            Backend::Native(_) => Mode::Native,
        }
    }

    /// 组合多个后端
    pub fn hybrid(options: SessionOptions) -> HybridBuilder {
        HybridBuilder::new(options)
    }

    /// 创建会话；技能集合的形态必须与后端匹配
    pub async fn new_session(&self, skills: SkillSet, opts: SessionOptions) -> Result<Session, HiveError> {
        let id = Session::new_id();
        let session = match (self, skills) {
            (Backend::Local, SkillSet::Packages(list)) => {
                let ctx = build_context(&id, &list, &opts).await?;
                let system = join_prompts(
                    opts.system_prompt.as_deref(),
                    skills_system_prompt(&list, SkillMount::Host),
                );
                let dispatch = Arc::new(HostDispatch::new(Arc::new(LocalHost::new(opts.max_output_bytes))));
                let state = direct_state(dispatch, None, system, direct_catalog(), PathView::Host, &opts);
                Session::new(id, Mode::Local, SkillSet::Packages(list), Some(ctx), opts, state)
            }
            (Backend::Sandboxed(runtime), SkillSet::Packages(list)) => {
                let ctx = build_context(&id, &list, &opts).await?;
                let mount = SkillMount::Container {
                    skills_root: &ctx.skills_root,
                    mount: runtime.skills_mount(),
                };
                let system = join_prompts(opts.system_prompt.as_deref(), skills_system_prompt(&list, mount));
                let workspace_mount = runtime.workspace_mount().to_string();
                let host = ContainerHost::new(runtime.clone(), workspace_mount.clone(), opts.max_output_bytes);
                let dispatch = Arc::new(HostDispatch::new(Arc::new(host)));
                let state = direct_state(
                    dispatch,
                    Some(runtime.clone()),
                    system,
                    direct_catalog(),
                    PathView::Container { workspace_mount },
                    &opts,
                );
                Session::new(id, Mode::Sandboxed, SkillSet::Packages(list), Some(ctx), opts, state)
            }
            (Backend::Hosted(remote), SkillSet::Hosted(list)) => {
                let request = ModelRequest {
                    system: opts.system_prompt.clone(),
                    tools: Vec::new(),
                    container: Some(ContainerRequest {
                        id: None,
                        skills: list.clone(),
                    }),
                };
                let state = ModeState::Hosted(HostedState {
                    request,
                    remote: remote.clone(),
                });
                Session::new(id, Mode::Hosted, SkillSet::Hosted(list), None, opts, state)
            }
            (Backend::Native(registry), SkillSet::Native(names)) => {
                let capabilities = registry.snapshot(&names).await?;
                let native = NativeDispatch::build(&capabilities)?;
                let catalog = native.catalog();
                let ctx = build_context(&id, &[], &opts).await?;
                let system = opts.system_prompt.clone();
                let state = direct_state(Arc::new(native), None, system, catalog, PathView::Host, &opts);
                Session::new(id, Mode::Native, SkillSet::Native(names), Some(ctx), opts, state)
            }
            (backend, skills) => {
                return Err(HiveError::Config(format!(
                    "{} backend cannot run skill set {:?}",
                    backend.mode(),
                    skills
                )))
            }
        };
        tracing::info!(
            session_id = %session.id(),
            mode = %session.mode(),
            skills = ?session.skills().names(),
            "session created"
        );
        Ok(session)
    }

    /// 校验会话属于本后端后转交给 Session::chat
    pub async fn chat(
        &self,
        session: &Session,
        user: impl Into<MessageContent>,
        model: &dyn ModelClient,
        opts: &ChatOptions,
    ) -> Result<(ChatResponse, Session), TurnFailure> {
        if session.mode() != self.mode() {
            return Err(TurnFailure {
                error: HiveError::Config(format!(
                    "{} session cannot be driven by the {} backend",
                    session.mode(),
                    self.mode()
                )),
                partial: Box::new(session.clone()),
            });
        }
        session.chat(user, model, opts).await
    }
}

fn direct_state(
    dispatch: Arc<dyn ToolDispatch>,
    runtime: Option<Arc<dyn IsolatedRuntime>>,
    system: Option<String>,
    tools: Vec<crate::llm::ToolDefinition>,
    view: PathView,
    opts: &SessionOptions,
) -> ModeState {
    ModeState::Direct(DirectState {
        executor: ToolExecutor::new(dispatch, TaskScheduler::new(opts.max_concurrency)),
        runtime,
        request: ModelRequest {
            system,
            tools,
            container: None,
        },
        view,
        owns_working_dir: opts.working_directory.is_none(),
    })
}

fn join_prompts(base: Option<&str>, extra: Option<String>) -> Option<String> {
    match (base, extra) {
        (Some(b), Some(e)) => Some(format!("{b}\n\n{e}")),
        (Some(b), None) => Some(b.to_string()),
        (None, e) => e,
    }
}

/// 建立执行上下文并确保工作目录存在
async fn build_context(id: &str, skills: &[Skill], opts: &SessionOptions) -> Result<ExecutionContext, HiveError> {
    let working_dir = opts
        .working_directory
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("hive").join(id));
    tokio::fs::create_dir_all(&working_dir).await?;
    let skills_root: PathBuf = opts
        .skills_root
        .clone()
        .or_else(|| {
            skills
                .first()
                .and_then(|s| s.location.parent())
                .map(|p| p.to_path_buf())
        })
        .unwrap_or_else(|| working_dir.clone());

    let ctx = ExecutionContext::new(skills_root, working_dir)
        .with_allowed_paths(opts.allowed_paths.clone())
        .with_timeout_ms(opts.timeout_ms)
        .with_env(opts.env.clone())
        .with_executor_config(opts.executor_config.clone());
    Ok(if opts.allow_all_paths { ctx.allow_all() } else { ctx })
}

/// 混合会话构建器：每种模式至多一个子会话
pub struct HybridBuilder {
    options: SessionOptions,
    parts: Vec<(Backend, SkillSet, SessionOptions)>,
    cache: Option<Arc<ArtifactCache>>,
}

impl HybridBuilder {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            parts: Vec::new(),
            cache: None,
        }
    }

    pub fn backend(mut self, backend: Backend, skills: SkillSet, opts: SessionOptions) -> Self {
        self.parts.push((backend, skills, opts));
        self
    }

    /// 用于把托管产物拉取到本机 / 容器
    pub fn artifact_cache(mut self, cache: Arc<ArtifactCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn build(self) -> Result<Session, HiveError> {
        let mut subs: BTreeMap<Mode, Session> = BTreeMap::new();
        let mut routes = RoutingTable::default();
        let mut hosted_skills: Vec<HostedSkill> = Vec::new();
        let mut prompts = Vec::new();

        for (backend, skills, opts) in self.parts {
            let mode = backend.mode();
            if subs.contains_key(&mode) {
                return Err(HiveError::Config(format!("hybrid session already has a {mode} backend")));
            }
            let sub = backend.new_session(skills, opts).await?;
            match sub.skills() {
                SkillSet::Packages(list) => routes.add_packages(mode, list)?,
                SkillSet::Native(_) => routes.add_native(&sub.model_request().tools)?,
                SkillSet::Hosted(list) => hosted_skills.extend(list.iter().cloned()),
                SkillSet::Composite => {}
            }
            if mode != Mode::Hosted {
                if let Some(system) = &sub.model_request().system {
                    prompts.push(system.clone());
                }
            }
            subs.insert(mode, sub);
        }
        if subs.is_empty() {
            return Err(HiveError::Config("hybrid session needs at least one backend".to_string()));
        }

        let mut system: Vec<String> = self.options.system_prompt.iter().cloned().collect();
        if !routes.is_empty() {
            system.push(
                "Tool names are prefixed with the skill they belong to (<skill>_run, <skill>_read, <skill>_write, <skill>_modify). Files produced elsewhere can be passed as artifact://<id>."
                    .to_string(),
            );
        }
        system.extend(prompts);

        let request = ModelRequest {
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            tools: routes.catalog().to_vec(),
            container: (!hosted_skills.is_empty()).then(|| ContainerRequest {
                id: None,
                skills: hosted_skills,
            }),
        };
        tracing::info!(
            backends = subs.len(),
            tools = routes.len(),
            "hybrid session built"
        );
        let state = ModeState::Hybrid(HybridState {
            subs,
            routes: Arc::new(routes),
            cache: self.cache,
            request,
        });
        Ok(Session::new(
            Session::new_id(),
            Mode::Hybrid,
            SkillSet::Composite,
            None,
            self.options,
            state,
        ))
    }
}
