use async_trait::async_trait;
use dashmap::DashMap;
use etcd_client::{Client, GetOptions, PutOptions};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::Registry;
use super::types::ProviderRecord;
use crate::error::FrameworkError;

const ROOT: &str = "/registry-facade";
const LEASE_TTL_SECS: i64 = 30;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(LEASE_TTL_SECS as u64 / 3);
// 续期失败后重新申请租约的间隔
const RECOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// 注册中心用到的 etcd 操作：租约、续期与键值读写
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    async fn grant(&self, ttl: i64) -> Result<i64, FrameworkError>;

    /// 持续为租约续期，直到 `shutdown` 被取消（返回 Ok）或续期失败
    async fn keep_alive(
        &self,
        lease_id: i64,
        shutdown: &CancellationToken,
    ) -> Result<(), FrameworkError>;

    async fn put(&self, key: String, value: Vec<u8>, lease_id: i64) -> Result<(), FrameworkError>;

    async fn delete(&self, key: String) -> Result<(), FrameworkError>;

    async fn get_prefix(&self, prefix: String) -> Result<Vec<(String, Vec<u8>)>, FrameworkError>;
}

#[async_trait]
impl LeaseStore for Client {
    async fn grant(&self, ttl: i64) -> Result<i64, FrameworkError> {
        let mut client = self.clone();
        Ok(client.lease_grant(ttl, None).await?.id())
    }

    async fn keep_alive(
        &self,
        lease_id: i64,
        shutdown: &CancellationToken,
    ) -> Result<(), FrameworkError> {
        let mut client = self.clone();
        let (mut keeper, mut stream) = client.lease_keep_alive(lease_id).await?;
        let mut interval = tokio::time::interval(KEEP_ALIVE_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = interval.tick() => {}
            }

            keeper.keep_alive().await?;
            match stream.message().await? {
                Some(response) if response.ttl() > 0 => {}
                // ttl 为 0 表示租约已过期
                _ => return Err(FrameworkError::LeaseExpired { lease_id }),
            }
        }
    }

    async fn put(&self, key: String, value: Vec<u8>, lease_id: i64) -> Result<(), FrameworkError> {
        let mut client = self.clone();
        Client::put(
            &mut client,
            key,
            value,
            Some(PutOptions::new().with_lease(lease_id)),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, key: String) -> Result<(), FrameworkError> {
        let mut client = self.clone();
        Client::delete(&mut client, key, None).await?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: String) -> Result<Vec<(String, Vec<u8>)>, FrameworkError> {
        let mut client = self.clone();
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;

        Ok(response
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    kv.value().to_vec(),
                )
            })
            .collect())
    }
}

// 注册中心与续期任务共享的状态
struct LeaseState<S> {
    store: S,
    // 当前有效的租约，过期后清空
    lease: Mutex<Option<i64>>,
    // etcd 键 -> 本进程发布的提供者，换租约时重新写入
    published: DashMap<String, ProviderRecord>,
    recovery_interval: Duration,
}

impl<S: LeaseStore> LeaseState<S> {
    async fn put(&self, provider: &ProviderRecord, lease_id: i64) -> Result<(), FrameworkError> {
        let value = serde_json::to_vec(provider)?;
        self.store.put(provider_key(provider), value, lease_id).await
    }

    async fn expire(&self, lease_id: i64) {
        let mut lease = self.lease.lock().await;
        if *lease == Some(lease_id) {
            *lease = None;
        }
    }

    // 重新申请租约并写回已发布的提供者
    // 返回 Some 表示新租约由调用方负责续期，None 表示已有其他任务在续期
    async fn recover(&self) -> Result<Option<i64>, FrameworkError> {
        let mut lease = self.lease.lock().await;
        let (lease_id, granted) = match *lease {
            Some(lease_id) => (lease_id, false),
            None => (self.store.grant(LEASE_TTL_SECS).await?, true),
        };

        let providers: Vec<ProviderRecord> = self
            .published
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for provider in &providers {
            self.put(provider, lease_id).await?;
        }

        *lease = Some(lease_id);
        tracing::info!(
            lease_id,
            providers = providers.len(),
            "Restored providers in etcd"
        );
        Ok(granted.then_some(lease_id))
    }
}

async fn maintain_lease<S: LeaseStore>(
    state: Arc<LeaseState<S>>,
    mut lease_id: i64,
    shutdown: CancellationToken,
) {
    loop {
        match state.store.keep_alive(lease_id, &shutdown).await {
            Ok(()) => return,
            Err(e) => {
                tracing::error!(lease_id, error = %e, "etcd lease keep-alive failed");
            }
        }
        state.expire(lease_id).await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(state.recovery_interval) => {}
            }

            match state.recover().await {
                Ok(Some(granted)) => {
                    lease_id = granted;
                    break;
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to restore etcd lease, retrying");
                }
            }
        }
    }
}

/// 基于 etcd 的注册中心，提供者记录挂在租约上，进程退出后自动过期
///
/// 续期失败时会重新申请租约并写回本进程发布的提供者。
pub struct EtcdRegistry<S: LeaseStore = Client> {
    state: Arc<LeaseState<S>>,
    task_tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl EtcdRegistry<Client> {
    /// `address` 支持逗号分隔的多个 `host:port`
    pub async fn connect(
        address: &str,
        task_tracker: &TaskTracker,
        shutdown: &CancellationToken,
    ) -> Result<Self, FrameworkError> {
        let endpoints: Vec<String> = address
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(|endpoint| format!("http://{endpoint}"))
            .collect();

        let client = Client::connect(endpoints, None).await?;
        Ok(Self::with_store(
            client,
            RECOVERY_INTERVAL,
            task_tracker,
            shutdown,
        ))
    }
}

impl<S: LeaseStore> EtcdRegistry<S> {
    pub fn with_store(
        store: S,
        recovery_interval: Duration,
        task_tracker: &TaskTracker,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            state: Arc::new(LeaseState {
                store,
                lease: Mutex::new(None),
                published: DashMap::new(),
                recovery_interval,
            }),
            task_tracker: task_tracker.clone(),
            shutdown: shutdown.child_token(),
        }
    }

    // 没有有效租约时申请新租约并启动续期任务
    async fn lease_id(&self) -> Result<i64, FrameworkError> {
        let mut lease = self.state.lease.lock().await;
        if let Some(lease_id) = *lease {
            return Ok(lease_id);
        }

        let lease_id = self.state.store.grant(LEASE_TTL_SECS).await?;
        *lease = Some(lease_id);
        self.task_tracker.spawn(maintain_lease(
            self.state.clone(),
            lease_id,
            self.shutdown.clone(),
        ));

        tracing::debug!(lease_id, ttl = LEASE_TTL_SECS, "Granted etcd lease");
        Ok(lease_id)
    }
}

impl<S: LeaseStore> fmt::Debug for EtcdRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdRegistry")
            .field("published", &self.state.published.len())
            .finish()
    }
}

fn service_prefix(interface: &str, version: &str) -> String {
    format!("{ROOT}/{interface}/{version}/providers/")
}

fn provider_key(provider: &ProviderRecord) -> String {
    format!(
        "{}{}",
        service_prefix(&provider.interface, &provider.version),
        provider.address()
    )
}

#[async_trait]
impl<S: LeaseStore> Registry for EtcdRegistry<S> {
    async fn register(&self, provider: &ProviderRecord) -> Result<(), FrameworkError> {
        let lease_id = self.lease_id().await?;
        self.state.put(provider, lease_id).await?;
        self.state
            .published
            .insert(provider_key(provider), provider.clone());

        tracing::debug!(key = %provider_key(provider), lease_id, "Registered provider in etcd");
        Ok(())
    }

    async fn unregister(&self, provider: &ProviderRecord) -> Result<(), FrameworkError> {
        let key = provider_key(provider);
        self.state.published.remove(&key);
        self.state.store.delete(key).await
    }

    async fn lookup(
        &self,
        interface: &str,
        version: &str,
    ) -> Result<Vec<ProviderRecord>, FrameworkError> {
        let entries = self
            .state
            .store
            .get_prefix(service_prefix(interface, version))
            .await?;

        let mut providers = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice::<ProviderRecord>(&value) {
                Ok(provider) => providers.push(provider),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed provider record");
                }
            }
        }

        Ok(providers)
    }
}

impl<S: LeaseStore> Drop for EtcdRegistry<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
