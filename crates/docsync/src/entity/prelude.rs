//! Common re-exports for convenient entity usage.

pub use super::budget::{Column as BudgetColumn, Entity as Budget, Model as BudgetModel};
pub use super::octa_webhook::{
    Column as OctaWebhookColumn, Entity as OctaWebhook, Model as OctaWebhookModel,
};
pub use super::order::{Column as OrderColumn, Entity as Order, Model as OrderModel};
pub use super::role_user::{Column as RoleUserColumn, Entity as RoleUser, Model as RoleUserModel};
pub use super::user::{Column as UserColumn, Entity as User, Model as UserModel};
