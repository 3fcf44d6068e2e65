use std::path::Path;
use tonic::{Request, Response, Status};

use crate::config::FacadeSettings;
use crate::demo::greeter_server::{Greeter, GreeterServer};
use crate::demo::{HelloReply, HelloRequest};
use crate::facade::RegistryFacade;

pub const DEMO_VERSION: &str = "1.0.0";

const DEFAULT_CONFIG_PATH: &str = "facade.toml";

/// 示例 Greeter 服务实现
#[derive(Debug, Clone)]
pub struct DemoGreeter {
    application: String,
}

impl DemoGreeter {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
        }
    }
}

#[tonic::async_trait]
impl Greeter for DemoGreeter {
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloReply>, Status> {
        let name = request.into_inner().name;
        if name.is_empty() {
            return Err(Status::invalid_argument("name must not be empty"));
        }

        tracing::debug!(name = %name, "Handling SayHello");
        Ok(Response::new(HelloReply {
            message: format!("Hello, {name}!"),
            served_by: self.application.clone(),
        }))
    }
}

// 优先读取配置文件，不存在时读取 FACADE_ 环境变量
fn load_settings() -> Result<FacadeSettings, Box<dyn std::error::Error>> {
    let path = std::env::var("FACADE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if Path::new(&path).exists() {
        tracing::info!(path = %path, "Loading settings from file");
        FacadeSettings::load(&path)
    } else {
        tracing::info!("Loading settings from environment");
        Ok(FacadeSettings::from_env()?)
    }
}

pub async fn start() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_settings()?.into_config()?;
    let application = config.application.name.clone();
    let facade = RegistryFacade::new(config);

    facade
        .register_service(GreeterServer::new(DemoGreeter::new(application)), DEMO_VERSION)
        .await?;

    if let Some(addr) = facade
        .framework()
        .provider_addr(facade.config().protocol.port)
        .await
    {
        tracing::info!(address = %addr, "Provider listening");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C, shutting down...");
    facade.framework().shutdown().await;
    Ok(())
}
