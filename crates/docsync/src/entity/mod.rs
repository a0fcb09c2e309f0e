//! SeaORM entity definitions for the source tables read by sync jobs.
//!
//! The schema is owned by the upstream application; these entities are
//! read-only views of the columns the replica needs.

pub mod budget;
pub mod octa_webhook;
pub mod order;
pub mod prelude;
pub mod role_user;
pub mod user;
