//! Key-set differ: decides which replica documents to delete and which source
//! records to write.

use std::collections::BTreeSet;

use super::types::{KeyedSet, NaturalKey};

/// The writes one run must perform.
///
/// `to_delete` only holds replica keys, `to_upsert` only holds source keys,
/// and the two never overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<K: NaturalKey> {
    /// Replica keys with no source counterpart.
    pub to_delete: BTreeSet<K>,
    /// Source keys that are new or changed, in key order.
    pub to_upsert: Vec<K>,
    /// Number of `to_upsert` keys absent from the replica.
    pub inserted: usize,
    /// Number of `to_upsert` keys present in the replica.
    pub updated: usize,
    /// Keys present in both stores with no detected change.
    pub unchanged: usize,
    /// Deletions were withheld because the source set was empty.
    pub deletion_suppressed: bool,
}

impl<K: NaturalKey> Default for ChangeSet<K> {
    fn default() -> Self {
        Self {
            to_delete: BTreeSet::new(),
            to_upsert: Vec::new(),
            inserted: 0,
            updated: 0,
            unchanged: 0,
            deletion_suppressed: false,
        }
    }
}

impl<K: NaturalKey> ChangeSet<K> {
    /// Whether applying this change set would issue no writes.
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_upsert.is_empty()
    }
}

/// Compare a source keyed set against the replica.
///
/// Records present in both stores are written only when `is_changed` returns
/// true. An empty source never deletes: a transient empty read must not wipe
/// the replica.
pub fn diff<K, S, R, F>(
    source: &KeyedSet<K, S>,
    replica: &KeyedSet<K, R>,
    is_changed: F,
) -> ChangeSet<K>
where
    K: NaturalKey,
    F: Fn(&S, &R) -> bool,
{
    let mut changes = ChangeSet::default();

    if source.is_empty() {
        changes.deletion_suppressed = !replica.is_empty();
        return changes;
    }

    changes.to_delete = replica
        .keys()
        .filter(|key| !source.contains_key(*key))
        .cloned()
        .collect();

    for (key, record) in source {
        match replica.get(key) {
            None => {
                changes.to_upsert.push(key.clone());
                changes.inserted += 1;
            }
            Some(existing) if is_changed(record, existing) => {
                changes.to_upsert.push(key.clone());
                changes.updated += 1;
            }
            Some(_) => changes.unchanged += 1,
        }
    }

    changes
}
