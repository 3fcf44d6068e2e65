use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::FacadeError;

/// 服务提供者线程数，暂时固定为 200
pub const DEFAULT_PROTOCOL_THREADS: usize = 200;

const SCHEME_SEPARATOR: &str = "://";

// 当前应用配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationConfig {
    pub name: String,
    pub qos_port: u16,
}

// 注册中心配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub protocol: String,
    pub address: String,
}

impl RegistryConfig {
    /// 解析 `<scheme>://<address>` 形式的注册中心地址，只按第一个 `://` 切分
    pub fn parse(url: &str) -> Result<Self, FacadeError> {
        let malformed = || FacadeError::MalformedAddress {
            url: url.to_string(),
        };

        let (protocol, address) = url.split_once(SCHEME_SEPARATOR).ok_or_else(malformed)?;
        if protocol.is_empty() || address.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            protocol: protocol.to_string(),
            address: address.to_string(),
        })
    }

    pub fn url(&self) -> String {
        format!("{}{}{}", self.protocol, SCHEME_SEPARATOR, self.address)
    }
}

// 服务提供者协议配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub name: String,
    /// 注册到注册中心的对外地址
    pub host: String,
    pub port: u16,
    pub threads: usize,
}

// 服务消费者配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// 引用缓存的键策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKeyMode {
    /// 只按接口缓存，同一接口的不同版本共享第一次解析出的句柄
    #[default]
    Interface,
    /// 按 (接口, 版本) 缓存
    InterfaceVersion,
}

/// 门面配置，初始化后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacadeConfig {
    pub application: ApplicationConfig,
    pub registry: RegistryConfig,
    pub protocol: ProtocolConfig,
    pub consumer: ConsumerConfig,
    pub reference_key: ReferenceKeyMode,
}

impl FacadeConfig {
    pub fn new(
        registry_url: &str,
        application_name: &str,
        protocol_name: &str,
        protocol_port: u16,
        qos_port: u16,
    ) -> Result<Self, FacadeError> {
        let registry = RegistryConfig::parse(registry_url)?;

        Ok(Self {
            application: ApplicationConfig {
                name: application_name.to_string(),
                qos_port,
            },
            registry,
            protocol: ProtocolConfig {
                name: protocol_name.to_string(),
                host: "127.0.0.1".to_string(),
                port: protocol_port,
                threads: DEFAULT_PROTOCOL_THREADS,
            },
            consumer: ConsumerConfig::default(),
            reference_key: ReferenceKeyMode::default(),
        })
    }

    pub fn with_protocol_host(mut self, host: impl Into<String>) -> Self {
        self.protocol.host = host.into();
        self
    }

    pub fn with_consumer(mut self, consumer: ConsumerConfig) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn with_reference_key(mut self, mode: ReferenceKeyMode) -> Self {
        self.reference_key = mode;
        self
    }
}

/// 从配置文件或环境变量读取的启动参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacadeSettings {
    pub registry_url: String,
    pub application_name: String,
    #[serde(default = "default_protocol_name")]
    pub protocol_name: String,
    #[serde(default = "default_protocol_host")]
    pub protocol_host: String,
    pub protocol_port: u16,
    #[serde(default)]
    pub qos_port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub reference_key: ReferenceKeyMode,
}

fn default_protocol_name() -> String {
    "tri".to_string()
}

fn default_protocol_host() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

impl FacadeSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config_str = fs::read_to_string(path)?;
        let settings: FacadeSettings = toml::from_str(&config_str)?;
        Ok(settings)
    }

    /// 读取 `FACADE_` 前缀的环境变量，先加载 `.env`
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("FACADE_").from_env()
    }

    pub fn into_config(self) -> Result<FacadeConfig, FacadeError> {
        let config = FacadeConfig::new(
            &self.registry_url,
            &self.application_name,
            &self.protocol_name,
            self.protocol_port,
            self.qos_port,
        )?
        .with_protocol_host(self.protocol_host)
        .with_consumer(ConsumerConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
        .with_reference_key(self.reference_key);

        Ok(config)
    }
}
