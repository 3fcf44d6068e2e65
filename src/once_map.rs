use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// 并发安全的 get-or-init 映射：同一个键的初始化只会执行一次，失败不会被缓存
#[derive(Debug)]
pub(crate) struct OnceMap<K, V>
where
    K: Eq + Hash,
{
    cells: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for OnceMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }
}

impl<K, V> OnceMap<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.cells
            .get(key)
            .and_then(|cell| cell.value().get().cloned())
    }

    pub(crate) async fn get_or_try_init<E, F, Fut>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // 只在取出 cell 时持有分片锁，初始化过程中不持锁
        let cell = Arc::clone(&self.cells.entry(key).or_default());
        cell.get_or_try_init(init).await.cloned()
    }

    /// 直接写入已初始化的值，覆盖原有条目
    pub(crate) fn insert(&self, key: K, value: V) {
        self.cells
            .insert(key, Arc::new(OnceCell::new_with(Some(value))));
    }

    /// 已完成初始化的条目数
    pub(crate) fn len(&self) -> usize {
        self.cells
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }
}
