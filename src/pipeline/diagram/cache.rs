//! Diagram model cache keyed by record-set fingerprint

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::DiagramModel;
use crate::storage::SharedDatabase;
use crate::types::{AtlasError, Result};

/// Two-tier store for synthesized models: a `DashMap` in memory plus the
/// optional `diagram_models` table. Persisted rows are checksum-verified.
#[derive(Default)]
pub struct DiagramCache {
    memory: DashMap<String, Arc<DiagramModel>>,
    store: Option<SharedDatabase>,
}

impl DiagramCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn persistent(db: SharedDatabase) -> Self {
        Self {
            memory: DashMap::new(),
            store: Some(db),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Arc<DiagramModel>>> {
        if let Some(model) = self.memory.get(key) {
            return Ok(Some(model.clone()));
        }

        let Some(db) = &self.store else {
            return Ok(None);
        };
        let Some((json, checksum)) = db.load_diagram(key)? else {
            return Ok(None);
        };

        let actual = crc32fast::hash(json.as_bytes());
        if actual != checksum {
            return Err(AtlasError::corruption(
                key,
                format!("diagram checksum mismatch: stored {:08x}, computed {:08x}", checksum, actual),
            ));
        }
        let model: DiagramModel = serde_json::from_str(&json)
            .map_err(|e| AtlasError::corruption(key, format!("unreadable diagram: {}", e)))?;

        debug!(key = %&key[..12.min(key.len())], "Diagram promoted from persistent tier");
        let model = Arc::new(model);
        self.memory.insert(key.to_string(), model.clone());
        Ok(Some(model))
    }

    pub fn put(&self, key: &str, model: Arc<DiagramModel>) -> Result<()> {
        if let Some(db) = &self.store {
            let json = serde_json::to_string(model.as_ref())?;
            db.put_diagram(key, &json, crc32fast::hash(json.as_bytes()))?;
        }
        self.memory.insert(key.to_string(), model);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn clear(&self) {
        self.memory.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::diagram::{ComponentKind, ComponentNode};
    use crate::storage::Database;
    use crate::types::NodeId;

    fn model() -> Arc<DiagramModel> {
        Arc::new(DiagramModel {
            nodes: vec![ComponentNode {
                id: NodeId::file("a.py"),
                label: "a.py".into(),
                kind: ComponentKind::File,
            }],
            edges: vec![],
            caption: None,
        })
    }

    fn store() -> SharedDatabase {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        Arc::new(db)
    }

    #[test]
    fn test_persistent_tier_survives_restart() {
        let db = store();
        let first = DiagramCache::persistent(db.clone());
        first.put("k1", model()).unwrap();

        let second = DiagramCache::persistent(db);
        assert!(second.is_empty());
        assert_eq!(second.get("k1").unwrap(), Some(model()));
        assert_eq!(second.len(), 1);
        assert!(second.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_tampered_row_is_refused() {
        let db = store();
        let json = serde_json::to_string(model().as_ref()).unwrap();
        db.put_diagram("k1", &json, crc32fast::hash(json.as_bytes()) ^ 1)
            .unwrap();

        let cache = DiagramCache::persistent(db);
        assert!(matches!(
            cache.get("k1"),
            Err(AtlasError::CacheCorruption { .. })
        ));
    }
}
