//! Registry backends
//!
//! The registry URL scheme selects the backend:
//! - `memory`: in-process registry shared by namespace
//! - `direct`: no registry, consumers dial the configured address
//! - `etcd`: providers are written under a lease in etcd

pub mod direct;
pub mod etcd;
pub mod memory;
pub mod types;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::RegistryConfig;
use crate::error::FrameworkError;

pub use direct::DirectRegistry;
pub use etcd::{EtcdRegistry, LeaseStore};
pub use memory::MemoryRegistry;
pub use types::{ProviderRecord, service_key};

/// 注册中心抽象
#[async_trait]
pub trait Registry: Send + Sync + Debug {
    /// 发布服务提供者
    async fn register(&self, provider: &ProviderRecord) -> Result<(), FrameworkError>;

    /// 撤销服务提供者
    async fn unregister(&self, provider: &ProviderRecord) -> Result<(), FrameworkError>;

    /// 查询某个接口版本的全部提供者
    async fn lookup(
        &self,
        interface: &str,
        version: &str,
    ) -> Result<Vec<ProviderRecord>, FrameworkError>;
}

/// 按协议名连接注册中心，后台任务挂在 `task_tracker` 上并随 `shutdown` 退出
pub async fn connect(
    config: &RegistryConfig,
    task_tracker: &TaskTracker,
    shutdown: &CancellationToken,
) -> Result<Arc<dyn Registry>, FrameworkError> {
    let registry: Arc<dyn Registry> = match config.protocol.to_ascii_lowercase().as_str() {
        "memory" => MemoryRegistry::namespace(&config.address),
        "direct" => Arc::new(DirectRegistry::new(&config.address)?),
        "etcd" => Arc::new(EtcdRegistry::connect(&config.address, task_tracker, shutdown).await?),
        _ => {
            return Err(FrameworkError::UnsupportedRegistry {
                scheme: config.protocol.clone(),
            });
        }
    };

    tracing::info!(registry = %config.url(), "Connected to registry");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect_detached(config: &RegistryConfig) -> Result<Arc<dyn Registry>, FrameworkError> {
        connect(config, &TaskTracker::new(), &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let config = RegistryConfig::parse("zookeeper://127.0.0.1:2181").unwrap();
        let err = connect_detached(&config).await.unwrap_err();
        assert!(matches!(err, FrameworkError::UnsupportedRegistry { ref scheme } if scheme == "zookeeper"));
    }

    #[tokio::test]
    async fn test_connect_memory_is_shared_per_namespace() {
        let config = RegistryConfig::parse("memory://registry-mod-test").unwrap();
        let first = connect_detached(&config).await.unwrap();
        let second = connect_detached(&config).await.unwrap();

        let provider = ProviderRecord {
            interface: "demo.Greeter".to_string(),
            version: "1.0.0".to_string(),
            protocol: "tri".to_string(),
            host: "127.0.0.1".to_string(),
            port: 50051,
            application: "provider".to_string(),
            instance_id: "instance-1".to_string(),
        };
        first.register(&provider).await.unwrap();

        let found = second.lookup("demo.Greeter", "1.0.0").await.unwrap();
        assert_eq!(found, vec![provider]);
    }
}
