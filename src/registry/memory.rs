use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, LazyLock};

use super::Registry;
use super::types::{ProviderRecord, service_key};
use crate::error::FrameworkError;

// 命名空间 -> 进程内注册表
static NAMESPACES: LazyLock<DashMap<String, Arc<MemoryRegistry>>> = LazyLock::new(DashMap::new);

/// 进程内注册中心，同一命名空间的门面共享同一份提供者列表
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    // interface:version -> 提供者列表
    providers: DashMap<String, Vec<ProviderRecord>>,
}

impl MemoryRegistry {
    pub fn namespace(name: &str) -> Arc<MemoryRegistry> {
        NAMESPACES.entry(name.to_string()).or_default().clone()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, provider: &ProviderRecord) -> Result<(), FrameworkError> {
        let mut providers = self.providers.entry(provider.service_key()).or_default();

        // 同一地址重复注册时替换旧记录
        providers.retain(|existing| existing.address() != provider.address());
        providers.push(provider.clone());

        tracing::debug!(
            service = %provider.service_key(),
            address = %provider.address(),
            providers = providers.len(),
            "Registered provider in memory registry"
        );
        Ok(())
    }

    async fn unregister(&self, provider: &ProviderRecord) -> Result<(), FrameworkError> {
        let key = provider.service_key();
        if let Some(mut providers) = self.providers.get_mut(&key) {
            providers.retain(|existing| existing.address() != provider.address());
        }
        self.providers.remove_if(&key, |_, providers| providers.is_empty());
        Ok(())
    }

    async fn lookup(
        &self,
        interface: &str,
        version: &str,
    ) -> Result<Vec<ProviderRecord>, FrameworkError> {
        Ok(self
            .providers
            .get(&service_key(interface, version))
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}
