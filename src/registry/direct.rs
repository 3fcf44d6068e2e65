use async_trait::async_trait;

use super::Registry;
use super::types::ProviderRecord;
use crate::error::FrameworkError;

/// 直连模式：不经过注册中心，消费者直接连接配置的地址
#[derive(Debug, Clone)]
pub struct DirectRegistry {
    host: String,
    port: u16,
}

impl DirectRegistry {
    pub fn new(address: &str) -> Result<Self, FrameworkError> {
        let malformed = || FrameworkError::MalformedProvider {
            address: address.to_string(),
        };

        let (host, port) = address.rsplit_once(':').ok_or_else(malformed)?;
        let port = port.parse::<u16>().map_err(|_| malformed())?;
        if host.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

#[async_trait]
impl Registry for DirectRegistry {
    async fn register(&self, provider: &ProviderRecord) -> Result<(), FrameworkError> {
        tracing::debug!(
            service = %provider.service_key(),
            "Direct registry, skipping provider registration"
        );
        Ok(())
    }

    async fn unregister(&self, _provider: &ProviderRecord) -> Result<(), FrameworkError> {
        Ok(())
    }

    async fn lookup(
        &self,
        interface: &str,
        version: &str,
    ) -> Result<Vec<ProviderRecord>, FrameworkError> {
        Ok(vec![ProviderRecord {
            interface: interface.to_string(),
            version: version.to_string(),
            protocol: "tri".to_string(),
            host: self.host.clone(),
            port: self.port,
            application: String::new(),
            instance_id: String::new(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_points_at_configured_address() {
        let registry = DirectRegistry::new("10.0.0.7:50051").unwrap();
        let found = registry.lookup("demo.Greeter", "1.0.0").await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].endpoint_uri(), "http://10.0.0.7:50051");
        assert_eq!(found[0].interface, "demo.Greeter");
    }

    #[test]
    fn test_rejects_address_without_port() {
        assert!(matches!(
            DirectRegistry::new("10.0.0.7"),
            Err(FrameworkError::MalformedProvider { .. })
        ));
        assert!(DirectRegistry::new(":50051").is_err());
        assert!(DirectRegistry::new("host:notaport").is_err());
    }
}
