use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MemoryEntry, MemoryStore, MemoryType, search_entries, session_index_key, sort_newest_first};

#[derive(Default)]
struct Inner {
    entries: HashMap<String, MemoryEntry>,
    // session index key -> ids
    by_session: HashMap<String, BTreeSet<String>>,
}

impl Inner {
    fn upsert(&mut self, entry: MemoryEntry) {
        let new_key = session_index_key(&entry.session_id, entry.kind);
        if let Some(previous) = self.entries.get(&entry.id) {
            let old_key = session_index_key(&previous.session_id, previous.kind);
            if old_key != new_key {
                if let Some(ids) = self.by_session.get_mut(&old_key) {
                    ids.remove(&entry.id);
                    if ids.is_empty() {
                        self.by_session.remove(&old_key);
                    }
                }
            }
        }
        self.by_session
            .entry(new_key)
            .or_default()
            .insert(entry.id.clone());
        self.entries.insert(entry.id.clone(), entry);
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, entry: MemoryEntry) -> anyhow::Result<()> {
        self.inner.write().await.upsert(entry);
        Ok(())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<MemoryEntry>> {
        Ok(self.inner.read().await.entries.get(id).cloned())
    }

    async fn search(
        &self,
        query: &str,
        project_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let inner = self.inner.read().await;
        Ok(search_entries(inner.entries.values(), query, project_id, limit))
    }

    async fn get_by_session(
        &self,
        session_id: &str,
        kind: MemoryType,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_session.get(&session_index_key(session_id, kind)) else {
            return Ok(Vec::new());
        };
        let mut entries = ids
            .iter()
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect::<Vec<_>>();
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn delete_by_session(&self, session_id: &str, kind: MemoryType) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(ids) = inner.by_session.remove(&session_index_key(session_id, kind)) {
            for id in ids {
                inner.entries.remove(&id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::conformance;

    #[tokio::test]
    async fn in_memory_store_meets_store_contract() {
        conformance::run_all(InMemoryStore::new).await;
    }

    #[tokio::test]
    async fn delete_of_unknown_session_is_a_no_op() {
        let store = InMemoryStore::new();
        store
            .store(MemoryEntry::new("s1", MemoryType::Plan, "keep me"))
            .await
            .expect("store should succeed");

        store
            .delete_by_session("nobody", MemoryType::Plan)
            .await
            .expect("delete should succeed");
        assert_eq!(store.len().await, 1);
    }
}
