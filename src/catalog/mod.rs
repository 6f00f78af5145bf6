//! Relationship catalog access.
//!
//! A [`Catalog`] describes the reference-typed fields of each object type.
//! [`CatalogClient`] wraps one with the session's exclusion list and memoizes
//! its answers, so each object type is described at most once per session.

use std::sync::Arc;

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, trace};

use crate::{
    Result,
    common::MemCache,
    model::{ObjectType, RelationshipDescriptor},
};

const DESCRIPTOR_CACHE_SIZE: usize = 1024;

/// Read-only metadata about relationship fields.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Reference-typed fields of `object_type`. Unknown types describe as empty.
    async fn describe_relationships(
        &self,
        object_type: &str,
    ) -> Result<Vec<RelationshipDescriptor>>;
}

/// Session-scoped catalog access with exclusion filtering.
///
/// Exclusion patterns are globs matched against `Object` for whole object
/// types and against `Object.field` for single fields, e.g. `User`,
/// `*.OwnerId` or `Account.Legacy*`.
pub struct CatalogClient {
    catalog: Arc<dyn Catalog>,
    excluded: GlobSet,
    descriptors: MemCache<ObjectType, Arc<Vec<RelationshipDescriptor>>>,
}

impl CatalogClient {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        excluded: &[String],
    ) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in excluded {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            catalog,
            excluded: builder.build()?,
            descriptors: MemCache::new(DESCRIPTOR_CACHE_SIZE),
        })
    }

    pub fn is_object_excluded(
        &self,
        object_type: &str,
    ) -> bool {
        self.excluded.is_match(object_type)
    }

    pub fn is_field_excluded(
        &self,
        object_type: &str,
        field_name: &str,
    ) -> bool {
        self.excluded.is_match(format!("{}.{}", object_type, field_name))
    }

    /// Eligible relationship fields of `object_type`, sorted by field name.
    ///
    /// Excluded fields are removed, excluded target types are removed from
    /// each descriptor, and descriptors left without any target are dropped.
    pub async fn relationships(
        &self,
        object_type: &str,
    ) -> Result<Arc<Vec<RelationshipDescriptor>>> {
        let key = object_type.to_string();
        if let Some(descriptors) = self.descriptors.get(&key) {
            return Ok(descriptors);
        }

        trace!("catalog::describe_relationships({})", object_type);
        let mut descriptors = self
            .catalog
            .describe_relationships(object_type)
            .await?
            .into_iter()
            .filter(|d| !self.is_field_excluded(object_type, &d.field_name))
            .filter_map(|mut d| {
                d.target_object_types.retain(|t| !self.is_object_excluded(t));
                (!d.target_object_types.is_empty()).then_some(d)
            })
            .collect::<Vec<_>>();
        descriptors.sort_by(|a, b| a.field_name.cmp(&b.field_name));
        debug!(object_type, relationships = descriptors.len(), "described relationships");

        let descriptors = Arc::new(descriptors);
        self.descriptors.set(key, descriptors.clone());
        Ok(descriptors)
    }
}
