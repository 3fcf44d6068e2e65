//! Registry facade
//!
//! - `contract`: typed remote service contracts
//! - `reference_cache`: single-flight cache of resolved handles
//! - `cell`: initialize-once holder for a facade

pub mod cell;
pub mod contract;
pub(crate) mod reference_cache;

use std::convert::Infallible;
use std::sync::Arc;
use tonic::body::Body;
use tonic::server::NamedService;
use tower::Service;

use crate::config::FacadeConfig;
use crate::error::FacadeError;
use crate::framework::{Framework, ReferenceConfig, ServiceConfig, ServiceInstaller, TonicFramework};

pub use cell::FacadeCell;
pub use contract::RemoteService;
use reference_cache::ReferenceCache;

/// 服务注册与引用门面
#[derive(Debug)]
pub struct RegistryFacade<F: Framework = TonicFramework> {
    config: FacadeConfig,
    framework: F,
    references: ReferenceCache,
}

impl RegistryFacade<TonicFramework> {
    pub fn new(config: FacadeConfig) -> Self {
        Self::with_framework(config, TonicFramework::new())
    }
}

impl<F: Framework> RegistryFacade<F> {
    pub fn with_framework(config: FacadeConfig, framework: F) -> Self {
        let references = ReferenceCache::new(config.reference_key);
        Self {
            config,
            framework,
            references,
        }
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    pub fn framework(&self) -> &F {
        &self.framework
    }

    /// 已缓存的远程服务句柄数量
    pub fn cached_references(&self) -> usize {
        self.references.len()
    }

    /// 暴露服务并注册到注册中心，接口名取自服务的 `NamedService::NAME`
    ///
    /// 每次调用都会向框架发起一次新的暴露。
    pub async fn register_service<S>(&self, service: S, version: &str) -> Result<(), FacadeError>
    where
        S: Service<
                http::Request<Body>,
                Response = http::Response<Body>,
                Error = Infallible,
            > + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let service = ServiceInstaller::new(service);
        let interface = service.interface();

        tracing::warn!(
            interface,
            version,
            port = self.config.protocol.port,
            "Registering service"
        );

        let config = ServiceConfig {
            application: self.config.application.clone(),
            registry: self.config.registry.clone(),
            protocol: self.config.protocol.clone(),
            interface: interface.to_string(),
            version: version.to_string(),
            service,
        };

        self.framework.export(config).await?;
        Ok(())
    }

    /// 获取远程服务句柄，首次调用时解析并缓存
    pub async fn reference_service<C: RemoteService>(
        &self,
        version: &str,
    ) -> Result<Arc<C>, FacadeError> {
        self.references
            .get_or_resolve::<C, _, _>(version, || async move {
                tracing::warn!(interface = C::INTERFACE, version, "Referencing service");
                let channel = self
                    .framework
                    .refer(self.reference_config(C::INTERFACE, version))
                    .await?;
                Ok(channel)
            })
            .await
    }

    fn reference_config(&self, interface: &str, version: &str) -> ReferenceConfig {
        ReferenceConfig {
            application: self.config.application.clone(),
            registry: self.config.registry.clone(),
            consumer: self.config.consumer.clone(),
            interface: interface.to_string(),
            version: version.to_string(),
        }
    }
}
