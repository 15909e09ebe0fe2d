//! 会话循环：工具结果循环（本机 / 容器 / 进程内共用）、续跑循环（托管）与混合路由

pub(crate) mod hosted;
pub mod hybrid;
pub(crate) mod loop_;

pub use hybrid::{RouteTarget, RoutingTable, ARTIFACT_SCHEME, STAGING_DIR};
