// ── Result store ──
//
// Persists templates and reports per (device, image, roll). The run
// orchestrator reads stored sector templates from it and writes the
// reports it collects back.

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Key of one stored result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub device: String,
    pub image_uid: String,
    /// Roll for baseline templates, `{run id}-{loop}` for run results.
    pub roll_uid: String,
}

impl ResultKey {
    pub fn new(
        device: impl Into<String>,
        image_uid: impl Into<String>,
        roll_uid: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            image_uid: image_uid.into(),
            roll_uid: roll_uid.into(),
        }
    }
}

/// A job template plus the report graded against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredResult {
    /// Job JSON as returned by the node.
    pub template: serde_json::Value,
    pub report: serde_json::Value,
    #[serde(skip)]
    pub image: Option<Bytes>,
}

impl StoredResult {
    /// Whether the template defines at least one sector.
    pub fn has_sectors(&self) -> bool {
        self.sectors().is_some_and(|s| !s.is_empty())
    }

    pub fn sectors(&self) -> Option<&Vec<serde_json::Value>> {
        self.template.get("sectors").and_then(|s| s.as_array())
    }

    /// Whether any sector's match mode depends on print order.
    pub fn has_sequencing(&self) -> bool {
        serde_json::from_value::<labelval_api::models::Job>(self.template.clone())
            .is_ok_and(|job| job.has_sequencing())
    }
}

/// Storage backend for results.
///
/// Only the operations the orchestrator needs. Implementations must be
/// safe to share between tasks.
pub trait ResultStore: Send + Sync {
    fn insert(&self, key: ResultKey, result: StoredResult) -> Result<(), CoreError>;
    fn select(&self, key: &ResultKey) -> Result<Option<StoredResult>, CoreError>;
    fn delete(&self, key: &ResultKey) -> Result<bool, CoreError>;
}

/// In-process store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<ResultKey, StoredResult>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every key stored for `roll_uid`.
    pub fn keys_for_roll(&self, roll_uid: &str) -> Vec<ResultKey> {
        self.entries
            .iter()
            .filter(|e| e.key().roll_uid == roll_uid)
            .map(|e| e.key().clone())
            .collect()
    }
}

impl ResultStore for MemoryStore {
    fn insert(&self, key: ResultKey, result: StoredResult) -> Result<(), CoreError> {
        self.entries.insert(key, result);
        Ok(())
    }

    fn select(&self, key: &ResultKey) -> Result<Option<StoredResult>, CoreError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    fn delete(&self, key: &ResultKey) -> Result<bool, CoreError> {
        Ok(self.entries.remove(key).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn insert_select_delete() {
        let store = MemoryStore::new();
        let key = ResultKey::new("node-1", "img-a", "roll-1");
        let result = StoredResult {
            template: json!({"name": "job", "sectors": [{"name": "verify1D_1"}]}),
            ..StoredResult::default()
        };

        store.insert(key.clone(), result).unwrap();
        assert!(store.select(&key).unwrap().unwrap().has_sectors());
        assert_eq!(store.keys_for_roll("roll-1"), vec![key.clone()]);

        assert!(store.delete(&key).unwrap());
        assert!(store.select(&key).unwrap().is_none());
        assert!(!store.delete(&key).unwrap());
    }

    #[test]
    fn sequencing_comes_from_match_mode() {
        let plain = StoredResult {
            template: json!({"name": "j", "sectors": [{"name": "a", "matchSettings": {"matchMode": 1}}]}),
            ..StoredResult::default()
        };
        let sequenced = StoredResult {
            template: json!({"name": "j", "sectors": [{"name": "a", "matchSettings": {"matchMode": 4}}]}),
            ..StoredResult::default()
        };
        assert!(!plain.has_sequencing());
        assert!(sequenced.has_sequencing());
        assert!(!StoredResult::default().has_sectors());
    }
}
