//! Shared sync types and constants for all entity types.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::time::Duration;

use mongodb::bson::Bson;

/// Default interval between scheduler ticks (five minutes).
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default deadline for a single job run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(20);

/// Maximum time to wait for in-flight runs to finish after shutdown is requested.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// The entity types kept in sync with the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Accounts,
    Leads,
    Budgets,
    Orders,
}

impl EntityKind {
    /// All entity types in their default scheduling order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Accounts,
        EntityKind::Leads,
        EntityKind::Budgets,
        EntityKind::Orders,
    ];

    /// Replica collection holding this entity type.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Accounts => "users",
            EntityKind::Leads => "leads",
            EntityKind::Budgets => "budgets",
            EntityKind::Orders => "orders",
        }
    }

    /// Replica field carrying the natural key.
    pub fn key_field(self) -> &'static str {
        match self {
            EntityKind::Leads => "platform_id",
            EntityKind::Accounts | EntityKind::Budgets | EntityKind::Orders => "old_id",
        }
    }

    /// Entity type whose run must finish before this one starts.
    pub fn prerequisite(self) -> Option<EntityKind> {
        match self {
            EntityKind::Orders => Some(EntityKind::Budgets),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Accounts => "accounts",
            EntityKind::Leads => "leads",
            EntityKind::Budgets => "budgets",
            EntityKind::Orders => "orders",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown entity type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown entity type: {0} (expected one of accounts, leads, budgets, orders)")]
pub struct UnknownEntityKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accounts" | "users" => Ok(EntityKind::Accounts),
            "leads" => Ok(EntityKind::Leads),
            "budgets" => Ok(EntityKind::Budgets),
            "orders" => Ok(EntityKind::Orders),
            other => Err(UnknownEntityKind(other.to_string())),
        }
    }
}

/// A natural key issued by the source system.
///
/// Keys that are not `is_valid` are treated as malformed records and skipped
/// during extraction.
pub trait NaturalKey:
    Ord + Hash + Clone + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Whether this key identifies a well-formed record.
    fn is_valid(&self) -> bool;

    /// The key as stored in the replica document.
    fn to_bson(&self) -> Bson;

    /// Read a key back out of a replica field value.
    fn from_bson(value: &Bson) -> Option<Self>;
}

impl NaturalKey for i64 {
    fn is_valid(&self) -> bool {
        *self > 0
    }

    fn to_bson(&self) -> Bson {
        Bson::Int64(*self)
    }

    fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Int32(v) => Some(i64::from(*v)),
            Bson::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

impl NaturalKey for String {
    fn is_valid(&self) -> bool {
        !self.trim().is_empty()
    }

    fn to_bson(&self) -> Bson {
        Bson::String(self.clone())
    }

    fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Mapping from natural key to record, rebuilt from a full scan on every run.
pub type KeyedSet<K, R> = BTreeMap<K, R>;

/// Phase of a job run, used to give failures context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Extract,
    Diff,
    Delete,
    Upsert,
    Rebuild,
    /// The run as a whole (deadline exceeded, task panicked).
    Run,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Extract => "extract",
            Phase::Diff => "diff",
            Phase::Delete => "delete",
            Phase::Upsert => "upsert",
            Phase::Rebuild => "rebuild",
            Phase::Run => "run",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Valid records read from the source.
    pub source_records: usize,
    /// Valid documents read from the replica.
    pub replica_records: usize,
    /// Source records skipped for a missing or invalid key.
    pub skipped_source: usize,
    /// Replica documents skipped for a missing or invalid key.
    pub skipped_replica: usize,
    /// Documents removed because their key no longer exists at the source.
    pub deleted: u64,
    /// Records new to the replica.
    pub inserted: usize,
    /// Records present in both stores whose fields changed.
    pub updated: usize,
    /// Records present in both stores with no detected difference.
    pub unchanged: usize,
    /// Upsert batches sent.
    pub batches: usize,
    /// Batch size chosen for this run.
    pub batch_size: usize,
    /// References that could not be resolved against the replica.
    pub unresolved_references: usize,
    /// Deletions were skipped because the source returned no records.
    pub deletion_suppressed: bool,
}

impl SyncReport {
    /// Total number of records written (inserted or updated).
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    /// Whether this run touched the replica at all.
    pub fn is_noop(&self) -> bool {
        self.deleted == 0 && self.written() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>(), Ok(kind));
        }
        assert_eq!("USERS".parse::<EntityKind>(), Ok(EntityKind::Accounts));
        assert!("invoices".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_entity_kind_collections_and_keys() {
        assert_eq!(EntityKind::Accounts.collection(), "users");
        assert_eq!(EntityKind::Leads.key_field(), "platform_id");
        assert_eq!(EntityKind::Orders.key_field(), "old_id");
        assert_eq!(EntityKind::Orders.prerequisite(), Some(EntityKind::Budgets));
        assert_eq!(EntityKind::Budgets.prerequisite(), None);
    }

    #[test]
    fn test_numeric_key_validity() {
        assert!(1i64.is_valid());
        assert!(!0i64.is_valid());
        assert!(!(-7i64).is_valid());
    }

    #[test]
    fn test_string_key_validity() {
        assert!("abc".to_string().is_valid());
        assert!(!String::new().is_valid());
        assert!(!"   ".to_string().is_valid());
    }

    #[test]
    fn test_numeric_key_reads_both_int_widths() {
        assert_eq!(i64::from_bson(&Bson::Int32(42)), Some(42));
        assert_eq!(i64::from_bson(&Bson::Int64(42)), Some(42));
        assert_eq!(i64::from_bson(&Bson::String("42".into())), None);
        assert_eq!(String::from_bson(&Bson::Int32(1)), None);
    }

    #[test]
    fn test_sync_report_default_is_noop() {
        let report = SyncReport::default();
        assert!(report.is_noop());
        assert_eq!(report.written(), 0);
        assert!(!report.deletion_suppressed);
    }
}
