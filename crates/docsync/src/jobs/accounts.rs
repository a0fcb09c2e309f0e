//! Accounts: `users` + `role_user` tables into the `users` collection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{self, Document, doc};
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder};
use serde::Deserialize;

use crate::entity::prelude::*;
use crate::replica::ReplicaStore;
use crate::sync::{EntityKind, EntitySync, Result, SourceBatch};

use super::bson_date;

/// Role assigned to users with no `role_user` rows.
pub const DEFAULT_ROLE: &str = "collaborator";

/// Replica name of a source role id.
pub fn role_name(role_id: i64) -> &'static str {
    match role_id {
        1 => "super_admin",
        2 => "it",
        3 => "admin",
        4 => "leader",
        5 => "collaborator",
        6 => "designer",
        7 => "designer_coordinator",
        8 => "production",
        9 => "commercial",
        _ => "unknown",
    }
}

/// A user with its role names resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub roles: Vec<String>,
    pub created_at: Option<bson::DateTime>,
    pub updated_at: Option<bson::DateTime>,
}

#[derive(Debug, Deserialize)]
pub struct AccountDocument {
    pub old_id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Vec<String>>,
    pub updated_at: Option<bson::DateTime>,
}

pub struct Accounts {
    db: Arc<DatabaseConnection>,
}

impl Accounts {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntitySync for Accounts {
    type Key = i64;
    type Record = Account;
    type Document = AccountDocument;

    fn kind(&self) -> EntityKind {
        EntityKind::Accounts
    }

    async fn read_source(&self, _replica: &dyn ReplicaStore) -> Result<SourceBatch<Account>> {
        let assignments = RoleUser::find()
            .order_by_asc(RoleUserColumn::UserId)
            .order_by_asc(RoleUserColumn::RoleId)
            .all(self.db.as_ref())
            .await?;

        let mut roles: HashMap<i64, Vec<String>> = HashMap::new();
        for assignment in assignments {
            let names = roles.entry(assignment.user_id).or_default();
            let name = role_name(assignment.role_id);
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }

        let users = User::find().all(self.db.as_ref()).await?;
        let records = users
            .into_iter()
            .map(|user| Account {
                id: user.id,
                name: user.name.unwrap_or_default(),
                email: user.email.unwrap_or_default(),
                roles: roles
                    .remove(&user.id)
                    .unwrap_or_else(|| vec![DEFAULT_ROLE.to_string()]),
                created_at: bson_date(user.created_at),
                updated_at: bson_date(user.updated_at),
            })
            .collect();

        Ok(SourceBatch::new(records))
    }

    fn record_key(record: &Account) -> Option<i64> {
        Some(record.id)
    }

    fn document_key(document: &AccountDocument) -> Option<i64> {
        document.old_id
    }

    fn is_changed(record: &Account, document: &AccountDocument) -> bool {
        document.name.as_deref() != Some(record.name.as_str())
            || document.email.as_deref() != Some(record.email.as_str())
            || document.role.as_ref() != Some(&record.roles)
            || document.updated_at != record.updated_at
    }

    fn render(record: &Account) -> Result<Document> {
        Ok(doc! {
            "old_id": record.id,
            "name": record.name.as_str(),
            "email": record.email.as_str(),
            "role": record.roles.clone(),
            "created_at": record.created_at,
            "updated_at": record.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use sea_orm::{DatabaseBackend, MockDatabase};

    use super::*;
    use crate::entity::{role_user, user};
    use crate::replica::MemoryReplica;

    fn user_row(id: i64, name: Option<&str>) -> user::Model {
        user::Model {
            id,
            name: name.map(str::to_string),
            email: Some(format!("{id}@example.com")),
            created_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0),
            updated_at: None,
        }
    }

    fn assignment(user_id: i64, role_id: i64) -> role_user::Model {
        role_user::Model { user_id, role_id }
    }

    #[test]
    fn test_role_names_cover_known_and_unknown_ids() {
        assert_eq!(role_name(1), "super_admin");
        assert_eq!(role_name(7), "designer_coordinator");
        assert_eq!(role_name(9), "commercial");
        assert_eq!(role_name(0), "unknown");
        assert_eq!(role_name(10), "unknown");
    }

    #[tokio::test]
    async fn test_read_source_resolves_roles_and_defaults() {
        let db = MockDatabase::new(DatabaseBackend::MySql)
            .append_query_results([vec![
                assignment(1, 3),
                assignment(1, 8),
                assignment(1, 8),
                assignment(2, 42),
            ]])
            .append_query_results([vec![
                user_row(1, Some("Ana")),
                user_row(2, Some("Bruno")),
                user_row(3, None),
            ]])
            .into_connection();

        let batch = Accounts::new(Arc::new(db))
            .read_source(&MemoryReplica::new())
            .await
            .expect("mock queries should succeed");

        let roles: Vec<Vec<String>> = batch.records.iter().map(|a| a.roles.clone()).collect();
        assert_eq!(
            roles,
            vec![
                vec!["admin".to_string(), "production".to_string()],
                vec!["unknown".to_string()],
                vec!["collaborator".to_string()],
            ]
        );
        assert_eq!(batch.records[2].name, "");
        assert_eq!(batch.unresolved_references, 0);
    }

    #[test]
    fn test_is_changed_detects_role_and_timestamp_changes() {
        let record = Account {
            id: 1,
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            roles: vec!["admin".to_string()],
            created_at: None,
            updated_at: Some(bson::DateTime::from_millis(1_000)),
        };
        let same: AccountDocument =
            bson::from_document(Accounts::render(&record).unwrap()).unwrap();
        assert!(!Accounts::is_changed(&record, &same));

        let mut promoted = record.clone();
        promoted.roles.push("leader".to_string());
        assert!(Accounts::is_changed(&promoted, &same));

        let mut touched = record.clone();
        touched.updated_at = Some(bson::DateTime::from_millis(2_000));
        assert!(Accounts::is_changed(&touched, &same));
    }
}
