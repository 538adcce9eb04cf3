//! The loaded-table-handle cache owned by each backend instance.

use mea::rwlock::RwLock;
use std::{collections::HashMap, future::Future, sync::Arc};

/// Lazily populated map from table name to a backend-specific handle.
///
/// Concurrent first accesses for one name may both build a handle; the last insert wins
/// and either handle is valid. Entries are only removed when the table is dropped.
#[derive(Debug)]
pub struct TableHandleCache<H> {
    handles: RwLock<HashMap<String, Arc<H>>>,
}

impl<H> TableHandleCache<H> {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, table: &str) -> Option<Arc<H>> {
        self.handles.read().await.get(table).cloned()
    }

    /// Returns the cached handle or builds, caches and returns a new one.
    ///
    /// No lock is held while `init` runs.
    pub async fn get_or_try_init<F, Fut, E>(&self, table: &str, init: F) -> Result<Arc<H>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H, E>>,
    {
        if let Some(handle) = self.get(table).await {
            return Ok(handle);
        }

        let handle = Arc::new(init().await?);
        self.handles
            .write()
            .await
            .insert(table.to_string(), handle.clone());
        Ok(handle)
    }

    pub async fn insert(&self, table: &str, handle: H) -> Arc<H> {
        let handle = Arc::new(handle);
        self.handles
            .write()
            .await
            .insert(table.to_string(), handle.clone());
        handle
    }

    pub async fn remove(&self, table: &str) -> Option<Arc<H>> {
        self.handles.write().await.remove(table)
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names = self
            .handles
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

impl<H> Default for TableHandleCache<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn builds_once_per_name_until_removed() {
        let cache = TableHandleCache::<String>::new();
        let builds = AtomicU32::new(0);
        let counter = &builds;
        let build = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>("handle".to_string())
        };
        cache.get_or_try_init("orders", build).await.unwrap();
        cache.get_or_try_init("orders", build).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.names().await, vec!["orders".to_string()]);

        cache.remove("orders").await;
        cache.get_or_try_init("orders", build).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_builds_are_not_cached() {
        let cache = TableHandleCache::<u8>::new();
        let result = cache
            .get_or_try_init("t", || async { Err::<u8, _>("unreachable backend") })
            .await;
        assert_eq!(result, Err("unreachable backend"));
        assert!(cache.get("t").await.is_none());
    }
}
