//! Leads: `octa_webhook` table into the `leads` collection, keyed by the
//! Octa conversation id stored as `platform_id`.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{self, Document, doc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Deserialize;

use crate::entity::prelude::*;
use crate::replica::ReplicaStore;
use crate::sync::{EntityKind, EntitySync, Result, SourceBatch};

use super::bson_date;

/// Value of the `source` field on every replicated lead.
pub const LEAD_SOURCE: &str = "Octa";

#[derive(Debug, Clone, PartialEq)]
pub struct Lead {
    pub platform_id: String,
    pub name: String,
    pub phone: String,
    pub created_at: Option<bson::DateTime>,
    pub updated_at: Option<bson::DateTime>,
}

impl From<OctaWebhookModel> for Lead {
    fn from(row: OctaWebhookModel) -> Self {
        Self {
            platform_id: row.id,
            name: row.nome.unwrap_or_default(),
            phone: row.telefone.unwrap_or_default(),
            created_at: bson_date(row.created_at),
            updated_at: bson_date(row.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LeadDocument {
    pub platform_id: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub updated_at: Option<bson::DateTime>,
}

pub struct Leads {
    db: Arc<DatabaseConnection>,
}

impl Leads {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntitySync for Leads {
    type Key = String;
    type Record = Lead;
    type Document = LeadDocument;

    fn kind(&self) -> EntityKind {
        EntityKind::Leads
    }

    async fn read_source(&self, _replica: &dyn ReplicaStore) -> Result<SourceBatch<Lead>> {
        let rows = OctaWebhook::find()
            .filter(OctaWebhookColumn::Id.is_not_null())
            .all(self.db.as_ref())
            .await?;
        Ok(SourceBatch::new(rows.into_iter().map(Lead::from).collect()))
    }

    fn record_key(record: &Lead) -> Option<String> {
        Some(record.platform_id.clone())
    }

    fn document_key(document: &LeadDocument) -> Option<String> {
        document.platform_id.clone()
    }

    fn is_changed(record: &Lead, document: &LeadDocument) -> bool {
        document.name.as_deref() != Some(record.name.as_str())
            || document.phone.as_deref() != Some(record.phone.as_str())
            || document.updated_at != record.updated_at
    }

    fn render(record: &Lead) -> Result<Document> {
        Ok(doc! {
            "platform_id": record.platform_id.as_str(),
            "name": record.name.as_str(),
            "phone": record.phone.as_str(),
            "source": LEAD_SOURCE,
            "created_at": record.created_at,
            "updated_at": record.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::{DatabaseBackend, MockDatabase};

    use super::*;
    use crate::entity::octa_webhook;
    use crate::replica::MemoryReplica;

    fn row(id: &str, nome: Option<&str>, telefone: Option<&str>) -> octa_webhook::Model {
        octa_webhook::Model {
            id: id.to_string(),
            nome: nome.map(str::to_string),
            email: None,
            telefone: telefone.map(str::to_string),
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_read_source_maps_portuguese_columns() {
        let db = MockDatabase::new(DatabaseBackend::MySql)
            .append_query_results([vec![
                row("c-1", Some("Carla"), Some("+55 11 99999-0000")),
                row("c-2", None, None),
            ]])
            .into_connection();

        let batch = Leads::new(Arc::new(db))
            .read_source(&MemoryReplica::new())
            .await
            .expect("mock query should succeed");

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].name, "Carla");
        assert_eq!(batch.records[0].phone, "+55 11 99999-0000");
        assert_eq!(batch.records[1].name, "");
        assert_eq!(batch.records[1].phone, "");
    }

    #[test]
    fn test_render_tags_source_and_owns_platform_id() {
        let lead = Lead::from(row("c-9", Some("Davi"), Some("123")));
        let rendered = Leads::render(&lead).unwrap();
        assert_eq!(rendered.get_str("platform_id").unwrap(), "c-9");
        assert_eq!(rendered.get_str("source").unwrap(), LEAD_SOURCE);
        assert!(!rendered.contains_key("email"));
    }

    #[test]
    fn test_blank_ids_are_not_valid_keys() {
        use crate::sync::extract;

        let leads = vec![
            Lead::from(row("", Some("nobody"), None)),
            Lead::from(row("   ", Some("nobody"), None)),
            Lead::from(row("c-1", Some("Eva"), None)),
        ];
        let extracted = extract(leads, Leads::record_key);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted.skipped, 2);
    }

    #[test]
    fn test_is_changed_ignores_fields_it_does_not_own() {
        let lead = Lead::from(row("c-1", Some("Eva"), Some("1")));
        let stored = LeadDocument {
            platform_id: Some("c-1".to_string()),
            name: Some("Eva".to_string()),
            phone: Some("1".to_string()),
            updated_at: None,
        };
        assert!(!Leads::is_changed(&lead, &stored));

        let renamed = Lead {
            name: "Eva Maria".to_string(),
            ..lead
        };
        assert!(Leads::is_changed(&renamed, &stored));
    }
}
