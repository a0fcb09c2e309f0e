//! Budgets: `budgets` table into the `budgets` collection.
//!
//! The seller and lead columns hold source ids; the replica stores the
//! `_id` of the matching `users` and `leads` documents instead. A reference
//! that cannot be resolved is stored as null and counted in the run report.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{self, Document, doc};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::Deserialize;

use crate::entity::budget;
use crate::replica::{ReferenceTable, ReplicaStore};
use crate::sync::{EntityKind, EntitySync, Result, SourceBatch, SyncError};

use super::bson_date;

#[derive(Debug, Clone, PartialEq)]
pub struct Budget {
    pub id: i64,
    pub seller: Option<ObjectId>,
    pub related_lead: Option<ObjectId>,
    pub cep: Option<String>,
    pub created_at: Option<bson::DateTime>,
    pub updated_at: Option<bson::DateTime>,
}

#[derive(Debug, Deserialize)]
pub struct BudgetDocument {
    pub old_id: Option<i64>,
    pub seller: Option<ObjectId>,
    pub related_lead: Option<ObjectId>,
    pub cep: Option<String>,
    pub updated_at: Option<bson::DateTime>,
}

pub struct Budgets {
    db: Arc<DatabaseConnection>,
}

impl Budgets {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntitySync for Budgets {
    type Key = i64;
    type Record = Budget;
    type Document = BudgetDocument;

    fn kind(&self) -> EntityKind {
        EntityKind::Budgets
    }

    async fn read_source(&self, replica: &dyn ReplicaStore) -> Result<SourceBatch<Budget>> {
        let (accounts, prospects) = (EntityKind::Accounts, EntityKind::Leads);
        let (rows, sellers, leads) = tokio::try_join!(
            async {
                budget::Entity::find()
                    .all(self.db.as_ref())
                    .await
                    .map_err(SyncError::from)
            },
            async {
                ReferenceTable::<i64>::load(replica, accounts.collection(), accounts.key_field())
                    .await
                    .map_err(SyncError::from)
            },
            async {
                ReferenceTable::<String>::load(
                    replica,
                    prospects.collection(),
                    prospects.key_field(),
                )
                .await
                .map_err(SyncError::from)
            },
        )?;

        let mut unresolved = 0usize;
        let records = rows
            .into_iter()
            .map(|row| Budget {
                id: row.id,
                seller: sellers.resolve_counted(row.seller_id.as_ref(), &mut unresolved),
                related_lead: leads.resolve_counted(row.lead_id.as_ref(), &mut unresolved),
                cep: row.cep,
                created_at: bson_date(row.created_at),
                updated_at: bson_date(row.updated_at),
            })
            .collect();

        Ok(SourceBatch {
            records,
            unresolved_references: unresolved,
        })
    }

    fn record_key(record: &Budget) -> Option<i64> {
        Some(record.id)
    }

    fn document_key(document: &BudgetDocument) -> Option<i64> {
        document.old_id
    }

    fn is_changed(record: &Budget, document: &BudgetDocument) -> bool {
        document.updated_at != record.updated_at
            || document.cep != record.cep
            || document.seller != record.seller
            || document.related_lead != record.related_lead
    }

    fn render(record: &Budget) -> Result<Document> {
        Ok(doc! {
            "old_id": record.id,
            "seller": record.seller,
            "related_lead": record.related_lead,
            "cep": record.cep.as_deref(),
            "created_at": record.created_at,
            "updated_at": record.updated_at,
        })
    }
}
