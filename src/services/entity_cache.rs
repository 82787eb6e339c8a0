use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Session-lifetime memo of fetched documents keyed by id.
///
/// Concurrent lookups of the same uncached id share one pending fetch. A
/// document found to be missing is remembered as missing; a fetch that fails
/// is not remembered, so a later lookup tries again. Entries are never
/// refreshed, so a profile edited after its first fetch stays stale until the
/// cache is cleared.
pub struct EntityCache<V> {
    entries: Mutex<HashMap<String, Arc<OnceCell<Option<V>>>>>,
}

impl<V: Clone> EntityCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the slot for `id`
    fn slot(&self, id: &str) -> Arc<OnceCell<Option<V>>> {
        let mut entries = self.entries.lock();
        entries
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub async fn get_or_fetch<F, Fut>(&self, id: &str, fetch: F) -> Result<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>>>,
    {
        let slot = self.slot(id);
        let value = slot.get_or_try_init(fetch).await?;
        Ok(value.clone())
    }

    /// Cached value only, without fetching. `None` if never resolved.
    pub fn get(&self, id: &str) -> Option<Option<V>> {
        let entries = self.entries.lock();
        entries.get(id).and_then(|slot| slot.get().cloned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Number of resolved entries, missing documents included.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock();
        entries.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<V: Clone> Default for EntityCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
