//! MongoDB-backed replica store.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{ClientOptions, UpdateOneModel};
use mongodb::{Client, Collection, Database};

use super::errors::Result;
use super::{ReplicaStore, Upsert, UpsertOutcome};

/// Application name reported to the MongoDB server.
const APP_NAME: &str = "docsync";

/// Replica store backed by a MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoReplica {
    client: Client,
    database: Database,
}

impl MongoReplica {
    /// Build a client for `url` and select `database`.
    ///
    /// The driver connects lazily, so an unreachable server surfaces as an
    /// error on the first operation rather than here.
    ///
    /// # Errors
    /// Returns `ReplicaError::Mongo` if the connection string is invalid.
    pub async fn connect(url: &str, database: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(url).await?;
        options.app_name = Some(APP_NAME.to_string());
        let client = Client::with_options(options)?;
        let database = client.database(database);
        Ok(Self { client, database })
    }

    /// Name of the selected database.
    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

#[async_trait]
impl ReplicaStore for MongoReplica {
    async fn scan(&self, collection: &str) -> Result<Vec<Document>> {
        let cursor = self.collection(collection).find(doc! {}).await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        tracing::debug!(collection, count = documents.len(), "Scanned collection");
        Ok(documents)
    }

    async fn delete_many(
        &self,
        collection: &str,
        key_field: &str,
        keys: Vec<Bson>,
    ) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut filter = Document::new();
        filter.insert(key_field, doc! { "$in": keys });
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    async fn upsert_many(
        &self,
        collection: &str,
        key_field: &str,
        batch: Vec<Upsert>,
    ) -> Result<UpsertOutcome> {
        if batch.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        let namespace = self.collection(collection).namespace();
        let models: Vec<UpdateOneModel> = batch
            .into_iter()
            .map(|upsert| {
                let mut filter = Document::new();
                filter.insert(key_field, upsert.key);
                UpdateOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(filter)
                    .update(doc! { "$set": upsert.fields })
                    .upsert(true)
                    .build()
            })
            .collect();

        let result = self.client.bulk_write(models).await?;
        Ok(UpsertOutcome {
            matched: non_negative(result.matched_count),
            modified: non_negative(result.modified_count),
            upserted: non_negative(result.upserted_count),
        })
    }

    async fn clear(&self, collection: &str) -> Result<u64> {
        let result = self.collection(collection).delete_many(doc! {}).await?;
        Ok(result.deleted_count)
    }

    async fn replace_collection(&self, staging: &str, target: &str) -> Result<()> {
        let db = self.database.name();
        let command = doc! {
            "renameCollection": format!("{db}.{staging}"),
            "to": format!("{db}.{target}"),
            "dropTarget": true,
        };
        self.client.database("admin").run_command(command).await?;
        Ok(())
    }
}

fn non_negative(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}
