use dashmap::DashMap;
use futures::future::BoxFuture;
use http_body::Body as HttpBody;
use std::convert::Infallible;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::task::TaskTracker;
use tonic::Status;
use tonic::body::Body;
use tonic::service::Routes;
use tonic::transport::Server;
use tower::{Service, ServiceExt};

use super::{GrpcService, ServiceInstaller};
use crate::error::FrameworkError;

// 从 gRPC 路径解析完整服务名
// 例如："/demo.Greeter/SayHello" -> "demo.Greeter"
fn extract_service_name(path: &str) -> Option<&str> {
    let (service, method) = path.strip_prefix('/')?.split_once('/')?;
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some(service)
}

/// 按服务名分发请求的动态路由表，暴露新服务只需插入一条路由
#[derive(Clone, Default)]
pub(crate) struct ServiceTable {
    services: Arc<DashMap<&'static str, GrpcService>>,
}

impl ServiceTable {
    fn contains(&self, interface: &str) -> bool {
        self.services.contains_key(interface)
    }

    fn insert(&self, interface: &'static str, service: GrpcService) {
        self.services.insert(interface, service);
    }

    fn remove(&self, interface: &str) -> bool {
        self.services.remove(interface).is_some()
    }

    fn len(&self) -> usize {
        self.services.len()
    }
}

impl fmt::Debug for ServiceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let interfaces: Vec<&str> = self.services.iter().map(|entry| *entry.key()).collect();
        f.debug_struct("ServiceTable")
            .field("interfaces", &interfaces)
            .finish()
    }
}

impl<B> Service<http::Request<B>> for ServiceTable
where
    B: HttpBody<Data = bytes::Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let path = req.uri().path().to_string();
        let service = extract_service_name(&path)
            .and_then(|name| self.services.get(name).map(|entry| entry.value().clone()));

        Box::pin(async move {
            match service {
                Some(service) => service.oneshot(req.map(Body::new)).await,
                None => {
                    tracing::debug!(path = %path, "No exported service for request");
                    Ok(Status::unimplemented(format!("no service exported for path '{path}'"))
                        .into_http())
                }
            }
        })
    }
}

// 正在运行的 gRPC 服务
#[derive(Debug)]
struct RunningServer {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// 一个协议端口上的服务提供者
///
/// 端口上只运行一个 gRPC 服务器，暴露或撤销服务只修改路由表，
/// 已建立的连接和进行中的调用不受影响。
#[derive(Debug)]
pub(crate) struct ProviderServer {
    port: u16,
    threads: usize,
    services: ServiceTable,
    // 串行化暴露，同时保存运行中的服务器
    running: Mutex<Option<RunningServer>>,
    task_tracker: TaskTracker,
}

impl ProviderServer {
    pub(crate) fn new(port: u16, threads: usize, task_tracker: TaskTracker) -> Self {
        Self {
            port,
            threads,
            services: ServiceTable::default(),
            running: Mutex::new(None),
            task_tracker,
        }
    }

    /// 装入新服务，首次调用时启动服务器，返回实际监听地址
    pub(crate) async fn install(
        &self,
        service: ServiceInstaller,
    ) -> Result<SocketAddr, FrameworkError> {
        let mut running = self.running.lock().await;
        let interface = service.interface();

        if self.services.contains(interface) {
            return Err(FrameworkError::AlreadyExported {
                interface: interface.to_string(),
                port: running
                    .as_ref()
                    .map_or(self.port, |running| running.local_addr.port()),
            });
        }

        let local_addr = match running.as_ref() {
            Some(running) => running.local_addr,
            None => {
                let started = self.start().await?;
                let local_addr = started.local_addr;
                *running = Some(started);
                local_addr
            }
        };

        self.services.insert(interface, service.into_service());
        tracing::debug!(
            interface,
            address = %local_addr,
            services = self.services.len(),
            "Installed service on provider server"
        );
        Ok(local_addr)
    }

    /// 撤销已装入的服务，服务器继续运行
    pub(crate) async fn uninstall(&self, interface: &str) -> bool {
        let _running = self.running.lock().await;
        let removed = self.services.remove(interface);
        if removed {
            tracing::debug!(interface, "Removed service from provider server");
        }
        removed
    }

    async fn start(&self) -> Result<RunningServer, FrameworkError> {
        let port = self.port;
        let bind_error = |source| FrameworkError::Bind { port, source };

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        // 所有路径都交给动态路由表
        let routes = Routes::from(
            Routes::default()
                .into_axum_router()
                .fallback_service(self.services.clone()),
        );

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let mut server = Server::builder().concurrency_limit_per_connection(self.threads);
        let router = server.add_routes(routes);

        let handle = self.task_tracker.spawn(async move {
            let incoming = TcpListenerStream::new(listener);
            let signal = async {
                let _ = shutdown_rx.await;
            };

            if let Err(e) = router.serve_with_incoming_shutdown(incoming, signal).await {
                tracing::error!(address = %local_addr, error = %e, "Provider server terminated");
            }
        });

        tracing::info!(address = %local_addr, "Provider server started");
        Ok(RunningServer {
            shutdown,
            handle,
            local_addr,
        })
    }

    pub(crate) async fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.local_addr)
    }

    pub(crate) async fn shutdown(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(());
        if let Err(e) = running.handle.await {
            tracing::warn!(address = %running.local_addr, error = %e, "Provider server task failed");
        }
    }
}
