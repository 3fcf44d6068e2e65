use std::any::{Any, TypeId};
use std::future::Future;
use std::sync::Arc;
use tonic::transport::Channel;

use super::contract::RemoteService;
use crate::config::ReferenceKeyMode;
use crate::error::FacadeError;
use crate::once_map::OnceMap;

type Handle = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReferenceKey {
    interface: &'static str,
    // Interface 模式下为 None
    version: Option<String>,
    client: TypeId,
}

/// 远程服务句柄缓存，条目不会被淘汰
#[derive(Debug)]
pub(crate) struct ReferenceCache {
    mode: ReferenceKeyMode,
    entries: OnceMap<ReferenceKey, Handle>,
}

impl ReferenceCache {
    pub(crate) fn new(mode: ReferenceKeyMode) -> Self {
        Self {
            mode,
            entries: OnceMap::default(),
        }
    }

    fn key<C: RemoteService>(&self, version: &str) -> ReferenceKey {
        let version = match self.mode {
            ReferenceKeyMode::Interface => None,
            ReferenceKeyMode::InterfaceVersion => Some(version.to_string()),
        };

        ReferenceKey {
            interface: C::INTERFACE,
            version,
            client: TypeId::of::<C>(),
        }
    }

    /// 命中缓存直接返回；未命中时只解析一次，并发调用方共享同一个句柄
    pub(crate) async fn get_or_resolve<C, F, Fut>(
        &self,
        version: &str,
        resolve: F,
    ) -> Result<Arc<C>, FacadeError>
    where
        C: RemoteService,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Channel, FacadeError>>,
    {
        let key = self.key::<C>(version);

        let handle = match self.entries.get(&key) {
            Some(handle) => {
                tracing::debug!(interface = C::INTERFACE, version, "Reference cache hit");
                handle
            }
            None => {
                self.entries
                    .get_or_try_init(key, || async move {
                        let channel = resolve().await?;
                        Ok::<Handle, FacadeError>(Arc::new(C::from_channel(channel)))
                    })
                    .await?
            }
        };

        handle
            .downcast::<C>()
            .map_err(|_| FacadeError::HandleType {
                interface: C::INTERFACE.to_string(),
            })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
