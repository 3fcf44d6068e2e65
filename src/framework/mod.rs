//! RPC framework seam
//!
//! The facade only builds exposure/reference descriptors and hands them to a
//! [`Framework`]. [`TonicFramework`] is the shipped implementation:
//! - `provider`: one long-lived gRPC server per port, dispatching by service name
//! - `qos`: local operator port answering `ls`/`help`/`version`/`quit`
//! - `tonic_framework`: registry connections, exposure and channel resolution

pub(crate) mod provider;
pub(crate) mod qos;
pub mod tonic_framework;

use async_trait::async_trait;
use std::convert::Infallible;
use std::fmt;
use tonic::body::Body;
use tonic::server::NamedService;
use tonic::transport::Channel;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::config::{ApplicationConfig, ConsumerConfig, ProtocolConfig, RegistryConfig};
use crate::error::FrameworkError;

pub use tonic_framework::TonicFramework;

/// 门面委托的外部 RPC 框架
#[async_trait]
pub trait Framework: Send + Sync + 'static {
    /// 暴露并注册服务
    async fn export(&self, config: ServiceConfig) -> Result<(), FrameworkError>;

    /// 解析远程服务，返回可复用的通道
    async fn refer(&self, config: ReferenceConfig) -> Result<Channel, FrameworkError>;
}

/// 类型擦除后的 gRPC 服务
pub(crate) type GrpcService = BoxCloneSyncService<http::Request<Body>, http::Response<Body>, Infallible>;

/// 待暴露的 gRPC 服务，擦除具体的服务类型
pub struct ServiceInstaller {
    interface: &'static str,
    service: GrpcService,
}

impl ServiceInstaller {
    pub fn new<S>(service: S) -> Self
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
        Self {
            interface: S::NAME,
            service: BoxCloneSyncService::new(service),
        }
    }

    pub fn interface(&self) -> &'static str {
        self.interface
    }

    pub(crate) fn into_service(self) -> GrpcService {
        self.service
    }
}

impl fmt::Debug for ServiceInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstaller")
            .field("interface", &self.interface)
            .finish()
    }
}

// 服务提供者暴露服务配置
#[derive(Debug)]
pub struct ServiceConfig {
    pub application: ApplicationConfig,
    pub registry: RegistryConfig,
    pub protocol: ProtocolConfig,
    pub interface: String,
    pub version: String,
    pub service: ServiceInstaller,
}

// 引用远程服务配置
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub application: ApplicationConfig,
    pub registry: RegistryConfig,
    pub consumer: ConsumerConfig,
    pub interface: String,
    pub version: String,
}
