//! Hive - 多后端技能执行编排
//!
//! 一个会话把用户消息交给模型，执行模型请求的工具调用，把结果回填，直到模型给出最终回答。
//! 同一套会话接口背后可以换不同的执行端。
//!
//! 模块划分：
//! - **artifacts**: 产物引用、会话产物账本、跨后端产物缓存
//! - **backend**: 后端（本机 / 容器 / 托管 / 进程内）与混合会话构建
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、工具并发调度
//! - **engine**: 工具结果循环、续跑循环、混合路由
//! - **llm**: 模型客户端抽象、消息类型与脚本化 Mock
//! - **native**: 进程内能力与注册表
//! - **observability**: tracing 订阅器初始化
//! - **sandbox**: 执行上下文、路径白名单、隔离运行时（Docker）
//! - **session**: 会话、选项与单轮结果
//! - **skills**: 技能引用与技能提示词
//! - **tools**: 四类工具（bash_tool / view / create_file / str_replace）与执行器

pub mod artifacts;
pub mod backend;
pub mod config;
pub mod core;
pub mod engine;
pub mod llm;
pub mod native;
pub mod observability;
pub mod sandbox;
pub mod session;
pub mod skills;
pub mod tools;

pub use artifacts::{ArtifactCache, ArtifactLedger, ArtifactRef, ArtifactSource};
pub use backend::{Backend, HybridBuilder};
pub use crate::core::HiveError;
pub use llm::{ModelClient, ModelRequest, ModelResponse, ScriptedModelClient};
pub use native::{Capability, CapabilityRegistry};
pub use session::{ChatOptions, ChatResponse, Mode, Session, SessionOptions, TurnFailure};
pub use skills::{HostedSkill, Skill, SkillSet};
