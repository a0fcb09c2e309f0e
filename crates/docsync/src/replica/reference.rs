use std::collections::HashMap;

use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document};

use crate::sync::NaturalKey;

use super::ReplicaStore;
use super::errors::Result;

/// Lookup from a foreign entity's natural key to its replica `_id`.
///
/// Built once per job run from a scan of the referenced collection and
/// dropped when the run ends.
#[derive(Debug, Clone)]
pub struct ReferenceTable<K: NaturalKey> {
    collection: String,
    ids: HashMap<K, ObjectId>,
}

impl<K: NaturalKey> ReferenceTable<K> {
    /// Scan `collection` and index every document by `key_field`.
    pub async fn load(replica: &dyn ReplicaStore, collection: &str, key_field: &str) -> Result<Self> {
        let documents = replica.scan(collection).await?;
        let table = Self::from_documents(collection, key_field, &documents);
        tracing::debug!(
            collection,
            key_field,
            entries = table.len(),
            "Loaded reference table"
        );
        Ok(table)
    }

    /// Index already-fetched documents. Documents without a valid key or an
    /// `ObjectId` `_id` are ignored.
    pub fn from_documents(collection: &str, key_field: &str, documents: &[Document]) -> Self {
        let ids = documents
            .iter()
            .filter_map(|doc| {
                let key = doc.get(key_field).and_then(K::from_bson)?;
                let id = match doc.get("_id") {
                    Some(Bson::ObjectId(id)) => *id,
                    _ => return None,
                };
                key.is_valid().then_some((key, id))
            })
            .collect();

        Self {
            collection: collection.to_string(),
            ids,
        }
    }

    /// Resolve a natural key to the replica identity, if the entity is known.
    pub fn resolve(&self, key: &K) -> Option<ObjectId> {
        self.ids.get(key).copied()
    }

    /// Resolve an optional key, counting misses in `unresolved`.
    ///
    /// A `None` key is not a miss: the record simply has no reference.
    pub fn resolve_counted(&self, key: Option<&K>, unresolved: &mut usize) -> Option<ObjectId> {
        let key = key.filter(|k| k.is_valid())?;
        let resolved = self.resolve(key);
        if resolved.is_none() {
            tracing::debug!(collection = %self.collection, key = %key, "Unresolved reference");
            *unresolved += 1;
        }
        resolved
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
