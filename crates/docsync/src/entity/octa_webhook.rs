//! OctaWebhook entity - leads captured from the Octa chat platform.
//!
//! Column names follow the upstream (Portuguese) schema.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "octa_webhook")]
pub struct Model {
    /// Conversation identifier assigned by Octa.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub nome: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub created_at: Option<DateTime>,
    pub updated_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
