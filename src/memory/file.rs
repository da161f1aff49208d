use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{MemoryEntry, MemoryStore, MemoryType, search_entries, sort_newest_first};

/// JSON-file backed store. The whole map is rewritten after every mutation,
/// and the in-memory map only changes once that write succeeds.
pub struct FileMemoryStore {
    entries: Mutex<BTreeMap<String, MemoryEntry>>,
    storage_path: PathBuf,
}

impl FileMemoryStore {
    /// Create or load the store at `path`. A missing file starts empty.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let storage_path = path.as_ref().to_path_buf();
        let entries = if storage_path.exists() {
            let content = std::fs::read_to_string(&storage_path).with_context(|| {
                format!("failed to read memory storage {}", storage_path.display())
            })?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).with_context(|| {
                    format!("failed to parse memory storage {}", storage_path.display())
                })?
            }
        } else {
            BTreeMap::new()
        };

        tracing::debug!(
            path = %storage_path.display(),
            entries = entries.len(),
            "opened file memory store"
        );

        Ok(Self {
            entries: Mutex::new(entries),
            storage_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    async fn persist(&self, entries: &BTreeMap<String, MemoryEntry>) -> anyhow::Result<()> {
        if let Some(parent) = self.storage_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("failed to create memory directory")?;
            }
        }
        let json = serde_json::to_string_pretty(entries).context("failed to serialize memory")?;
        tokio::fs::write(&self.storage_path, json)
            .await
            .context("failed to write memory storage")?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn store(&self, entry: MemoryEntry) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(entry.id.clone(), entry);
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<MemoryEntry>> {
        Ok(self.entries.lock().await.get(id).cloned())
    }

    async fn search(
        &self,
        query: &str,
        project_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let entries = self.entries.lock().await;
        Ok(search_entries(entries.values(), query, project_id, limit))
    }

    async fn get_by_session(
        &self,
        session_id: &str,
        kind: MemoryType,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let entries = self.entries.lock().await;
        let mut matches = entries
            .values()
            .filter(|entry| entry.session_id == session_id && entry.kind == kind)
            .cloned()
            .collect::<Vec<_>>();
        sort_newest_first(&mut matches);
        Ok(matches)
    }

    async fn delete_by_session(&self, session_id: &str, kind: MemoryType) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.retain(|_, entry| !(entry.session_id == session_id && entry.kind == kind));
        if next.len() != entries.len() {
            self.persist(&next).await?;
            *entries = next;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::conformance;

    #[tokio::test]
    async fn file_store_meets_store_contract() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        conformance::run_all(|| {
            let path = dir
                .path()
                .join(format!("memory-{}.json", uuid::Uuid::new_v4()));
            FileMemoryStore::open(path).expect("store should open")
        })
        .await;
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("nested").join("memory.json");

        let store = FileMemoryStore::open(&path).expect("store should open");
        store
            .store(
                MemoryEntry::new("s1", MemoryType::Plan, "phase one")
                    .with_id("plan-1")
                    .with_metadata("agent", "Planning"),
            )
            .await
            .expect("store should succeed");
        drop(store);

        let reopened = FileMemoryStore::open(&path).expect("store should reopen");
        let plans = reopened
            .get_by_session("s1", MemoryType::Plan)
            .await
            .expect("get_by_session should succeed");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].metadata_str("agent"), Some("Planning"));
    }

    #[tokio::test]
    async fn failed_write_does_not_keep_the_new_entry() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").expect("fixture should be written");

        let store = FileMemoryStore::open(blocker.join("memory.json")).expect("store should open");
        store
            .store(MemoryEntry::new("s1", MemoryType::Plan, "draft").with_id("plan-1"))
            .await
            .expect_err("directory creation under a file should fail");

        assert!(store.get("plan-1").await.expect("get should succeed").is_none());
        assert!(
            store
                .get_by_session("s1", MemoryType::Plan)
                .await
                .expect("get_by_session should succeed")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn failed_delete_keeps_entries_in_sync_with_disk() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("memory.json");
        let store = FileMemoryStore::open(&path).expect("store should open");
        store
            .store(MemoryEntry::new("s1", MemoryType::Plan, "phase one").with_id("plan-1"))
            .await
            .expect("store should succeed");

        std::fs::remove_file(&path).expect("fixture should be removed");
        std::fs::create_dir(&path).expect("fixture directory should be created");
        store
            .delete_by_session("s1", MemoryType::Plan)
            .await
            .expect_err("writing over a directory should fail");

        let plans = store
            .get_by_session("s1", MemoryType::Plan)
            .await
            .expect("get_by_session should succeed");
        assert_eq!(plans.len(), 1);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "{not json").expect("fixture should be written");

        let err = FileMemoryStore::open(&path)
            .err()
            .expect("corrupt storage should fail to open");
        assert!(format!("{err:#}").contains("failed to parse memory storage"));
    }
}
