use serde::{Deserialize, Serialize};

// 服务提供者注册信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub interface: String,
    pub version: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub application: String,
    pub instance_id: String,
}

impl ProviderRecord {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn endpoint_uri(&self) -> String {
        format!("http://{}", self.address())
    }

    /// 注册表内的服务键：`interface:version`
    pub fn service_key(&self) -> String {
        service_key(&self.interface, &self.version)
    }
}

pub fn service_key(interface: &str, version: &str) -> String {
    format!("{interface}:{version}")
}
