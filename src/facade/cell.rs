use std::convert::Infallible;
use std::sync::{Arc, OnceLock};
use tonic::body::Body;
use tonic::server::NamedService;
use tower::Service;

use super::{RegistryFacade, RemoteService};
use crate::config::FacadeConfig;
use crate::error::FacadeError;
use crate::framework::{Framework, TonicFramework};

/// 只初始化一次的门面容器：第一次成功的初始化生效，之后的参数被忽略
#[derive(Debug)]
pub struct FacadeCell<F: Framework = TonicFramework> {
    facade: OnceLock<Arc<RegistryFacade<F>>>,
}

impl<F: Framework> Default for FacadeCell<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Framework> FacadeCell<F> {
    pub const fn new() -> Self {
        Self {
            facade: OnceLock::new(),
        }
    }

    pub fn init(
        &self,
        registry_url: &str,
        application_name: &str,
        protocol_name: &str,
        protocol_port: u16,
        qos_port: u16,
    ) -> Result<Arc<RegistryFacade<F>>, FacadeError>
    where
        F: Default,
    {
        if let Some(facade) = self.facade.get() {
            tracing::debug!(
                registry_url,
                application_name,
                "Facade already initialized, ignoring new configuration"
            );
            return Ok(facade.clone());
        }

        let config = FacadeConfig::new(
            registry_url,
            application_name,
            protocol_name,
            protocol_port,
            qos_port,
        )?;
        Ok(self.init_with(config, F::default()))
    }

    /// 使用现成的配置和框架初始化；已初始化时丢弃传入的参数
    pub fn init_with(&self, config: FacadeConfig, framework: F) -> Arc<RegistryFacade<F>> {
        self.facade
            .get_or_init(|| {
                tracing::info!(
                    application = %config.application.name,
                    registry = %config.registry.url(),
                    "Initialized registry facade"
                );
                Arc::new(RegistryFacade::with_framework(config, framework))
            })
            .clone()
    }

    pub fn get(&self) -> Result<&Arc<RegistryFacade<F>>, FacadeError> {
        self.facade.get().ok_or(FacadeError::Uninitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.facade.get().is_some()
    }

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
        self.get()?.register_service(service, version).await
    }

    pub async fn reference_service<C: RemoteService>(
        &self,
        version: &str,
    ) -> Result<Arc<C>, FacadeError> {
        self.get()?.reference_service::<C>(version).await
    }
}
