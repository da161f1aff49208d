//! Session-scoped typed persistence.
//!
//! Every backend must produce the same ordering: newest first, ties broken by
//! ascending id. `store` is an upsert keyed by id.

pub mod file;
pub mod in_memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use file::FileMemoryStore;
pub use in_memory::InMemoryStore;

pub type Metadata = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryType {
    Plan,
    Research,
    Report,
    AgentState,
    Activity,
}

impl MemoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Plan => "Plan",
            MemoryType::Research => "Research",
            MemoryType::Report => "Report",
            MemoryType::AgentState => "AgentState",
            MemoryType::Activity => "Activity",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: MemoryType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl MemoryEntry {
    pub fn new(session_id: impl Into<String>, kind: MemoryType, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            project_id: None,
            kind,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_project(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// Logical index key for a session's entries of one type.
pub fn session_index_key(session_id: &str, kind: MemoryType) -> String {
    format!("{session_id}:{kind}")
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store(&self, entry: MemoryEntry) -> anyhow::Result<()>;

    async fn get(&self, id: &str) -> anyhow::Result<Option<MemoryEntry>>;

    async fn search(
        &self,
        query: &str,
        project_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>>;

    async fn get_by_session(
        &self,
        session_id: &str,
        kind: MemoryType,
    ) -> anyhow::Result<Vec<MemoryEntry>>;

    async fn delete_by_session(&self, session_id: &str, kind: MemoryType) -> anyhow::Result<()>;
}

pub(crate) fn sort_newest_first(entries: &mut [MemoryEntry]) {
    entries.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn matches_search(entry: &MemoryEntry, query_lower: &str, project_id: Option<&str>) -> bool {
    if let Some(project) = project_id {
        if entry.project_id.as_deref() != Some(project) {
            return false;
        }
    }
    entry.content.to_lowercase().contains(query_lower)
}

/// Shared search semantics over any iterator of entries.
pub(crate) fn search_entries<'a>(
    entries: impl Iterator<Item = &'a MemoryEntry>,
    query: &str,
    project_id: Option<&str>,
    limit: usize,
) -> Vec<MemoryEntry> {
    let query_lower = query.to_lowercase();
    let mut matches = entries
        .filter(|entry| matches_search(entry, &query_lower, project_id))
        .cloned()
        .collect::<Vec<_>>();
    sort_newest_first(&mut matches);
    matches.truncate(limit);
    matches
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_index_key_uses_session_and_type() {
        assert_eq!(session_index_key("abc", MemoryType::Plan), "abc:Plan");
        assert_eq!(
            session_index_key("abc", MemoryType::AgentState),
            "abc:AgentState"
        );
    }

    #[test]
    fn entry_serializes_kind_as_type_field() {
        let entry = MemoryEntry::new("s1", MemoryType::Report, "weekly status")
            .with_metadata("agent", "Reporting");
        let json = serde_json::to_value(&entry).expect("entry should serialize");
        assert_eq!(json["type"], "Report");
        assert_eq!(entry.metadata_str("agent"), Some("Reporting"));
        assert_eq!(entry.metadata_str("missing"), None);
    }
}
