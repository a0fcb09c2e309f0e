//! Orders: `orders` table into the `orders` collection.
//!
//! `related_budget` points at the replica `_id` of the budget, so orders are
//! scheduled after every budgets run.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{self, Document, doc};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::Deserialize;

use crate::entity::order;
use crate::replica::{ReferenceTable, ReplicaStore};
use crate::sync::{EntityKind, EntitySync, Result, SourceBatch, SyncError};

use super::bson_date;

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub related_budget: Option<ObjectId>,
    pub status: Option<String>,
    pub created_at: Option<bson::DateTime>,
    pub updated_at: Option<bson::DateTime>,
}

#[derive(Debug, Deserialize)]
pub struct OrderDocument {
    pub old_id: Option<i64>,
    pub related_budget: Option<ObjectId>,
    pub status: Option<String>,
    pub updated_at: Option<bson::DateTime>,
}

pub struct Orders {
    db: Arc<DatabaseConnection>,
}

impl Orders {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntitySync for Orders {
    type Key = i64;
    type Record = Order;
    type Document = OrderDocument;

    fn kind(&self) -> EntityKind {
        EntityKind::Orders
    }

    async fn read_source(&self, replica: &dyn ReplicaStore) -> Result<SourceBatch<Order>> {
        let parent = EntityKind::Budgets;
        let (rows, budgets) = tokio::try_join!(
            async { order::Entity::find().all(self.db.as_ref()).await.map_err(SyncError::from) },
            async {
                ReferenceTable::<i64>::load(replica, parent.collection(), parent.key_field())
                    .await
                    .map_err(SyncError::from)
            },
        )?;

        let mut unresolved = 0usize;
        let records = rows
            .into_iter()
            .map(|row| Order {
                id: row.id,
                related_budget: budgets.resolve_counted(row.budget_id.as_ref(), &mut unresolved),
                status: row.status,
                created_at: bson_date(row.created_at),
                updated_at: bson_date(row.updated_at),
            })
            .collect();

        Ok(SourceBatch {
            records,
            unresolved_references: unresolved,
        })
    }

    fn record_key(record: &Order) -> Option<i64> {
        Some(record.id)
    }

    fn document_key(document: &OrderDocument) -> Option<i64> {
        document.old_id
    }

    fn is_changed(record: &Order, document: &OrderDocument) -> bool {
        document.updated_at != record.updated_at
            || document.status != record.status
            || document.related_budget != record.related_budget
    }

    fn render(record: &Order) -> Result<Document> {
        Ok(doc! {
            "old_id": record.id,
            "related_budget": record.related_budget,
            "status": record.status.as_deref(),
            "created_at": record.created_at,
            "updated_at": record.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::{DatabaseBackend, MockDatabase};

    use super::*;
    use crate::replica::MemoryReplica;

    #[tokio::test]
    async fn test_read_source_links_orders_to_budget_ids() {
        let replica = MemoryReplica::new();
        replica.seed("budgets", vec![doc! { "old_id": 5_i64 }]);
        let budget_oid = replica.documents("budgets")[0]
            .get_object_id("_id")
            .unwrap();

        let db = MockDatabase::new(DatabaseBackend::MySql)
            .append_query_results([vec![
                order::Model {
                    id: 1,
                    budget_id: Some(5),
                    status: Some("paid".to_string()),
                    created_at: None,
                    updated_at: None,
                },
                order::Model {
                    id: 2,
                    budget_id: Some(6),
                    status: None,
                    created_at: None,
                    updated_at: None,
                },
            ]])
            .into_connection();

        let batch = Orders::new(Arc::new(db)).read_source(&replica).await.unwrap();

        assert_eq!(batch.records[0].related_budget, Some(budget_oid));
        assert_eq!(batch.records[1].related_budget, None);
        assert_eq!(batch.unresolved_references, 1);
    }

    #[test]
    fn test_status_change_is_detected() {
        let order = Order {
            id: 1,
            related_budget: None,
            status: Some("open".to_string()),
            created_at: None,
            updated_at: None,
        };
        let stored: OrderDocument = bson::from_document(Orders::render(&order).unwrap()).unwrap();
        assert!(!Orders::is_changed(&order, &stored));

        let shipped = Order {
            status: Some("shipped".to_string()),
            ..order
        };
        assert!(Orders::is_changed(&shipped, &stored));
    }
}
