//! 进程内能力（native capability）
//!
//! 每个能力模块声明自己的名字和支持的操作（run / read / write / modify 的子集），
//! 未实现的操作默认返回「不支持」。能力注册在显式的 CapabilityRegistry 中：
//! 单写者 / 多读者（tokio RwLock），会话创建时按名字取快照。

mod dispatch;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::core::HiveError;
use crate::sandbox::ExecutionContext;
use crate::tools::ToolKind;

pub use dispatch::NativeDispatch;

/// 能力操作的参数
pub type CapabilityInput = Map<String, Value>;

/// 进程内能力模块
#[async_trait]
pub trait Capability: Send + Sync {
    /// 唯一名字，也是其工具名的前缀
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// 声明支持的操作；只有声明过的操作会进入分发表
    fn operations(&self) -> Vec<ToolKind>;

    fn input_schema(&self, _kind: ToolKind) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn run(&self, _ctx: &ExecutionContext, _input: CapabilityInput) -> Result<String, String> {
        Err(unsupported(self.name(), ToolKind::Run))
    }

    async fn read(&self, _ctx: &ExecutionContext, _input: CapabilityInput) -> Result<String, String> {
        Err(unsupported(self.name(), ToolKind::Read))
    }

    async fn write(&self, _ctx: &ExecutionContext, _input: CapabilityInput) -> Result<String, String> {
        Err(unsupported(self.name(), ToolKind::Write))
    }

    async fn modify(&self, _ctx: &ExecutionContext, _input: CapabilityInput) -> Result<String, String> {
        Err(unsupported(self.name(), ToolKind::Modify))
    }
}

fn unsupported(name: &str, kind: ToolKind) -> String {
    format!("capability '{name}' does not support '{kind}'")
}

/// 能力注册表
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, Arc<dyn Capability>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名能力已存在时返回 Config 错误
    pub async fn register(&self, capability: Arc<dyn Capability>) -> Result<(), HiveError> {
        let name = capability.name().to_string();
        let mut guard = self.capabilities.write().await;
        if guard.contains_key(&name) {
            return Err(HiveError::Config(format!("capability '{name}' already registered")));
        }
        tracing::debug!(capability = %name, "capability registered");
        guard.insert(name, capability);
        Ok(())
    }

    /// 替换（热更新）同名能力，返回旧值
    pub async fn replace(&self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let name = capability.name().to_string();
        self.capabilities.write().await.insert(name, capability)
    }

    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.write().await.remove(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.capabilities.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 按名字取快照；任一名字未注册即失败
    pub async fn snapshot(&self, names: &[String]) -> Result<Vec<Arc<dyn Capability>>, HiveError> {
        let guard = self.capabilities.read().await;
        names
            .iter()
            .map(|name| {
                guard
                    .get(name)
                    .cloned()
                    .ok_or_else(|| HiveError::Config(format!("capability '{name}' is not registered")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock;

    #[async_trait]
    impl Capability for Clock {
        fn name(&self) -> &str {
            "clock"
        }

        fn operations(&self) -> Vec<ToolKind> {
            vec![ToolKind::Read]
        }

        async fn read(&self, _ctx: &ExecutionContext, _input: CapabilityInput) -> Result<String, String> {
            Ok("12:00".to_string())
        }
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(Clock)).await.unwrap();
        assert!(matches!(
            registry.register(Arc::new(Clock)).await,
            Err(HiveError::Config(_))
        ));
        assert_eq!(registry.names().await, vec!["clock".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_requires_known_names() {
        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(Clock)).await.unwrap();
        assert_eq!(registry.snapshot(&["clock".to_string()]).await.unwrap().len(), 1);
        assert!(registry.snapshot(&["weather".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_undeclared_operation_defaults_to_unsupported() {
        let ctx = ExecutionContext::new("/s", "/w");
        let err = Clock.run(&ctx, CapabilityInput::new()).await.unwrap_err();
        assert!(err.contains("does not support 'run'"));
    }

    struct Clock24;

    #[async_trait]
    impl Capability for Clock24 {
        fn name(&self) -> &str {
            "clock"
        }

        fn operations(&self) -> Vec<ToolKind> {
            vec![ToolKind::Read]
        }

        async fn read(&self, _ctx: &ExecutionContext, _input: CapabilityInput) -> Result<String, String> {
            Ok("24:00".to_string())
        }
    }

    #[tokio::test]
    async fn test_replace_does_not_touch_existing_snapshot() {
        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(Clock)).await.unwrap();
        let snapshot = registry.snapshot(&["clock".to_string()]).await.unwrap();

        assert!(registry.replace(Arc::new(Clock24)).await.is_some());
        let ctx = ExecutionContext::new("/s", "/w");
        let fresh = registry.get("clock").await.unwrap();
        assert_eq!(fresh.read(&ctx, CapabilityInput::new()).await.unwrap(), "24:00");
        assert_eq!(snapshot[0].read(&ctx, CapabilityInput::new()).await.unwrap(), "12:00");

        assert!(registry.unregister("clock").await.is_some());
        assert!(registry.unregister("clock").await.is_none());
        assert!(registry.names().await.is_empty());
    }
}
