//! Collaborators on both sides of a migration.
//!
//! Provides the abstractions the engine consumes and two backends:
//! - `MemOrg`: In-memory organization for testing and demos
//! - `PostgresOrg`: A PostgreSQL database acting as an organization

mod mem;
mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::{
    Result,
    model::{Fields, ObjectType, SourceRecord, TargetId},
};

pub use mem::{CallStats, MemOrg, UpdateCall};
pub use postgres::PostgresOrg;

/// Outcome of creating one payload: the minted identifier or the store's message.
pub type CreateOutcome = std::result::Result<TargetId, String>;

/// Read access to the source organization.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch one record, `Ok(None)` when it does not exist.
    async fn fetch_by_id(
        &self,
        object_type: &str,
        id: &str,
    ) -> Result<Option<SourceRecord>>;

    /// Concrete type of the record `id` among the candidates of a polymorphic field.
    ///
    /// The default probes each candidate in name order.
    async fn resolve_type(
        &self,
        candidates: &BTreeSet<ObjectType>,
        id: &str,
    ) -> Result<Option<ObjectType>> {
        for candidate in candidates {
            if self.fetch_by_id(candidate, id).await?.is_some() {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }
}

/// Write and lookup access to the target organization.
///
/// Any call may fail with [`MigrateError::Unreachable`](crate::MigrateError::Unreachable),
/// which ends the session. Other errors are scoped to the records of the call.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Create records, returning one outcome per payload in payload order.
    async fn create_many(
        &self,
        object_type: &str,
        payloads: Vec<Fields>,
    ) -> Result<Vec<CreateOutcome>>;

    async fn update_by_id(
        &self,
        object_type: &str,
        target_id: &str,
        fields: Fields,
    ) -> Result<()>;

    /// Identifier of a record whose `field` equals `value`, `Ok(None)` when absent.
    async fn query_by_field(
        &self,
        object_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<TargetId>>;
}
