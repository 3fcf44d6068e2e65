use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::{Channel, Endpoint};
use uuid::Uuid;

use super::provider::ProviderServer;
use super::qos::{self, QosState};
use super::{Framework, ReferenceConfig, ServiceConfig};
use crate::config::{ConsumerConfig, RegistryConfig};
use crate::error::FrameworkError;
use crate::once_map::OnceMap;
use crate::registry::{self, ProviderRecord, Registry};

// 支持的服务协议，均为 gRPC over HTTP/2
const SUPPORTED_PROTOCOLS: [&str; 3] = ["tri", "triple", "grpc"];

/// 基于 tonic 的 RPC 框架实现
#[derive(Debug)]
pub struct TonicFramework {
    // 注册中心地址 -> 注册中心连接
    registries: OnceMap<String, Arc<dyn Registry>>,
    // 协议端口 -> 服务提供者
    providers: DashMap<u16, Arc<ProviderServer>>,
    // 已发布的提供者，关闭时注销
    published: Mutex<Vec<(Arc<dyn Registry>, ProviderRecord)>>,
    qos_state: Arc<QosState>,
    qos_addr: OnceCell<Option<SocketAddr>>,
    task_tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Default for TonicFramework {
    fn default() -> Self {
        Self::new()
    }
}

impl TonicFramework {
    pub fn new() -> Self {
        Self {
            registries: OnceMap::default(),
            providers: DashMap::new(),
            published: Mutex::new(Vec::new()),
            qos_state: Arc::new(QosState::default()),
            qos_addr: OnceCell::new(),
            task_tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 为注册中心地址指定现成的注册中心，不再按协议名连接
    pub fn with_registry(self, registry_url: impl Into<String>, registry: Arc<dyn Registry>) -> Self {
        self.registries.insert(registry_url.into(), registry);
        self
    }

    /// QoS 服务的实际监听地址，未启动或已禁用时为 None
    pub fn qos_addr(&self) -> Option<SocketAddr> {
        self.qos_addr.get().copied().flatten()
    }

    /// 协议端口上提供者服务器的实际监听地址
    pub async fn provider_addr(&self, port: u16) -> Option<SocketAddr> {
        let server = self.providers.get(&port).map(|entry| entry.value().clone())?;
        server.local_addr().await
    }

    /// 注销已发布的服务，停止所有服务器并等待后台任务退出
    pub async fn shutdown(&self) {
        let published = std::mem::take(&mut *self.published.lock().await);
        for (registry, record) in published {
            if let Err(e) = registry.unregister(&record).await {
                tracing::warn!(
                    service = %record.service_key(),
                    error = %e,
                    "Failed to unregister provider"
                );
            }
        }

        let servers: Vec<Arc<ProviderServer>> = self
            .providers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for server in servers {
            server.shutdown().await;
        }

        self.shutdown.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        tracing::info!("Framework shut down");
    }

    async fn registry(&self, config: &RegistryConfig) -> Result<Arc<dyn Registry>, FrameworkError> {
        self.registries
            .get_or_try_init(config.url(), || {
                registry::connect(config, &self.task_tracker, &self.shutdown)
            })
            .await
    }

    // 首次暴露或引用时启动 QoS，启动失败不影响业务调用
    async fn ensure_qos(&self, port: u16) {
        if port == 0 {
            return;
        }

        self.qos_addr
            .get_or_init(|| async {
                match qos::start(
                    port,
                    self.qos_state.clone(),
                    &self.task_tracker,
                    self.shutdown.clone(),
                )
                .await
                {
                    Ok(addr) => {
                        tracing::info!(address = %addr, "QoS server started");
                        Some(addr)
                    }
                    Err(e) => {
                        tracing::warn!(port, error = %e, "Failed to start QoS server");
                        None
                    }
                }
            })
            .await;
    }

    fn check_protocol(name: &str) -> Result<(), FrameworkError> {
        if SUPPORTED_PROTOCOLS
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(name))
        {
            Ok(())
        } else {
            Err(FrameworkError::UnsupportedProtocol {
                name: name.to_string(),
            })
        }
    }

    fn endpoint(
        provider: &ProviderRecord,
        consumer: &ConsumerConfig,
    ) -> Result<Endpoint, FrameworkError> {
        Ok(Endpoint::from_shared(provider.endpoint_uri())?
            .connect_timeout(consumer.connect_timeout)
            .timeout(consumer.request_timeout))
    }
}

#[async_trait]
impl Framework for TonicFramework {
    async fn export(&self, config: ServiceConfig) -> Result<(), FrameworkError> {
        Self::check_protocol(&config.protocol.name)?;
        self.ensure_qos(config.application.qos_port).await;

        let registry = self.registry(&config.registry).await?;

        let port = config.protocol.port;
        let threads = config.protocol.threads;
        let server = self
            .providers
            .entry(port)
            .or_insert_with(|| {
                Arc::new(ProviderServer::new(port, threads, self.task_tracker.clone()))
            })
            .clone();

        let interface = config.service.interface();
        let local_addr = server.install(config.service).await?;

        let record = ProviderRecord {
            interface: config.interface,
            version: config.version,
            protocol: config.protocol.name,
            host: config.protocol.host,
            port: local_addr.port(),
            application: config.application.name,
            instance_id: Uuid::new_v4().to_string(),
        };
        // 发布失败时撤销已装入的服务，之后可以重新暴露
        if let Err(e) = registry.register(&record).await {
            server.uninstall(interface).await;
            return Err(e);
        }

        tracing::info!(
            service = %record.service_key(),
            address = %record.address(),
            registry = %config.registry.url(),
            "Exported service"
        );

        self.qos_state
            .providers
            .insert(record.service_key(), record.clone());
        self.published.lock().await.push((registry, record));
        Ok(())
    }

    async fn refer(&self, config: ReferenceConfig) -> Result<Channel, FrameworkError> {
        self.ensure_qos(config.application.qos_port).await;

        let registry = self.registry(&config.registry).await?;
        let providers = registry.lookup(&config.interface, &config.version).await?;
        if providers.is_empty() {
            return Err(FrameworkError::NoProvider {
                interface: config.interface,
                version: config.version,
            });
        }

        let mut endpoints = providers
            .iter()
            .map(|provider| Self::endpoint(provider, &config.consumer))
            .collect::<Result<Vec<_>, _>>()?;

        // 单个提供者时立即建连，多个时交给 tonic 做负载均衡
        let channel = if endpoints.len() == 1 {
            endpoints.remove(0).connect().await?
        } else {
            Channel::balance_list(endpoints.into_iter())
        };

        tracing::info!(
            interface = %config.interface,
            version = %config.version,
            providers = providers.len(),
            "Resolved remote service"
        );

        self.qos_state.consumers.insert(
            crate::registry::service_key(&config.interface, &config.version),
            providers.len(),
        );
        Ok(channel)
    }
}
