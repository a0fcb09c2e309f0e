//! Record extraction: full scans into keyed sets.

use mongodb::bson::{self, Document};
use serde::de::DeserializeOwned;

use super::errors::{Result, SyncError};
use super::types::{KeyedSet, NaturalKey};

/// A keyed set plus the number of records dropped for a malformed key.
#[derive(Debug)]
pub struct Extracted<K, R> {
    pub set: KeyedSet<K, R>,
    pub skipped: usize,
}

impl<K, R> Extracted<K, R> {
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Index `records` by natural key.
///
/// Records whose key is missing or not [`NaturalKey::is_valid`] are skipped
/// and counted; when two records share a key the later one wins.
pub fn extract<K, R, I, F>(records: I, key_of: F) -> Extracted<K, R>
where
    K: NaturalKey,
    I: IntoIterator<Item = R>,
    F: Fn(&R) -> Option<K>,
{
    let mut set = KeyedSet::new();
    let mut skipped = 0usize;

    for record in records {
        match key_of(&record) {
            Some(key) if key.is_valid() => {
                set.insert(key, record);
            }
            _ => skipped += 1,
        }
    }

    Extracted { set, skipped }
}

/// Decode replica documents into `R` and index them by natural key.
///
/// A document that does not decode (a field of the wrong type) aborts the
/// whole extraction.
pub fn extract_documents<K, R, F>(
    collection: &str,
    documents: Vec<Document>,
    key_of: F,
) -> Result<Extracted<K, R>>
where
    K: NaturalKey,
    R: DeserializeOwned,
    F: Fn(&R) -> Option<K>,
{
    let decoded = documents
        .into_iter()
        .map(|doc| bson::from_document::<R>(doc).map_err(|e| SyncError::decode(collection, e)))
        .collect::<Result<Vec<R>>>()?;

    Ok(extract(decoded, key_of))
}
