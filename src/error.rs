use thiserror::Error;

/// 门面层错误类型
#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("registry facade is not initialized, call init before using it")]
    Uninitialized,

    #[error("malformed registry address '{url}', expected <scheme>://<address>")]
    MalformedAddress { url: String },

    // 底层框架的错误原样透传
    #[error(transparent)]
    Framework(#[from] FrameworkError),

    #[error("cached handle for '{interface}' has an unexpected client type")]
    HandleType { interface: String },
}

/// RPC 框架（服务暴露、引用、注册中心）错误类型
#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("Failed to bind protocol port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported registry protocol: {scheme}")]
    UnsupportedRegistry { scheme: String },

    #[error("Unsupported service protocol: {name}")]
    UnsupportedProtocol { name: String },

    #[error("No provider available for {interface}:{version}")]
    NoProvider { interface: String, version: String },

    #[error("Service {interface} is already exported on port {port}")]
    AlreadyExported { interface: String, port: u16 },

    #[error("Malformed provider address: {address}")]
    MalformedProvider { address: String },

    #[error("etcd lease {lease_id} expired")]
    LeaseExpired { lease_id: i64 },

    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
