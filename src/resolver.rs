//! External-key resolution against the target organization.

use std::sync::Arc;

use regex::Regex;
use tracing::trace;

use crate::{
    Config, Result,
    common::FlightCache,
    graph::KeyReference,
    model::{FieldName, ObjectType, TargetId},
    store::TargetStore,
};

/// (target object type, key field, key value)
type LookupKey = (ObjectType, FieldName, String);

/// Finds existing target records by business key.
///
/// Lookups are cached for the session, misses included. Concurrent lookups of
/// the same key share a single store query. Failed queries are not cached.
pub struct ExternalKeyResolver {
    target: Arc<dyn TargetStore>,
    cache: FlightCache<LookupKey, Option<TargetId>>,
    id_field: FieldName,
    id_pattern: Option<Regex>,
}

impl ExternalKeyResolver {
    pub fn new(
        target: Arc<dyn TargetStore>,
        config: &Config,
    ) -> Result<Self> {
        let id_pattern = config.resolver.id_pattern.as_deref().map(Regex::new).transpose()?;

        Ok(Self {
            target,
            cache: FlightCache::new(config.resolver.cache_capacity),
            id_field: config.id_field.clone(),
            id_pattern,
        })
    }

    /// Target identifier of the `object_type` record whose `key_field` equals `key_value`.
    pub async fn resolve(
        &self,
        object_type: &str,
        key_field: &str,
        key_value: &str,
    ) -> Result<Option<TargetId>> {
        let key = (object_type.to_string(), key_field.to_string(), key_value.to_string());
        let target = self.target.clone();
        let (object_type, key_field, key_value) = key.clone();

        self.cache
            .get_or_load(key, async move {
                trace!("resolver::resolve({}, {}, {})", object_type, key_field, key_value);
                target.query_by_field(&object_type, &key_field, &key_value).await
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Resolve a captured key reference.
    ///
    /// Without an explicit key field the source identifier is looked up
    /// first, then the parent type's default key when one was captured.
    pub async fn resolve_reference(
        &self,
        object_type: &str,
        reference: &KeyReference,
    ) -> Result<Option<TargetId>> {
        if let Some(key_field) = &reference.key_field {
            return self.resolve(object_type, key_field, &reference.key_value).await;
        }

        if self.looks_like_id(&reference.key_value) {
            if let Some(id) = self.resolve(object_type, &self.id_field, &reference.key_value).await? {
                return Ok(Some(id));
            }
        }
        match &reference.fallback {
            Some((key_field, key_value)) => self.resolve(object_type, key_field, key_value).await,
            None => Ok(None),
        }
    }

    fn looks_like_id(
        &self,
        value: &str,
    ) -> bool {
        self.id_pattern.as_ref().is_none_or(|pattern| pattern.is_match(value))
    }
}
