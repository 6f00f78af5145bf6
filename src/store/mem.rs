use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::{
    MigrateError, Result, ShareLock,
    catalog::Catalog,
    model::{FieldName, Fields, ObjectType, RecordKey, RelationshipDescriptor, SourceRecord, TargetId},
    store::{CreateOutcome, RecordSource, TargetStore},
    utils,
};

/// Counters of the calls an organization has served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStats {
    pub describes: usize,
    pub fetches: usize,
    pub creates: usize,
    pub created: usize,
    pub updates: usize,
    pub queries: usize,
}

/// An update call as received by a [`MemOrg`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCall {
    pub object_type: ObjectType,
    pub target_id: TargetId,
    pub fields: Fields,
}

#[derive(Debug, Clone)]
struct Rejection {
    object_type: ObjectType,
    field: FieldName,
    /// `None` matches any non-null value
    value: Option<Value>,
    message: String,
}

#[derive(Debug, Default)]
struct OrgData {
    id_field: String,
    relationships: HashMap<ObjectType, Vec<RelationshipDescriptor>>,
    records: BTreeMap<ObjectType, BTreeMap<String, Fields>>,
    required: HashMap<ObjectType, Vec<FieldName>>,
    rejections: Vec<Rejection>,
    fetch_failures: HashSet<RecordKey>,
    unreachable: bool,
    latency: Option<Duration>,
    calls: CallStats,
    update_log: Vec<UpdateCall>,
}

impl OrgData {
    /// Validation message for a payload the organization refuses.
    fn validate(
        &self,
        object_type: &str,
        fields: &Fields,
    ) -> Option<String> {
        if let Some(required) = self.required.get(object_type) {
            for field in required {
                if fields.get(field).is_none_or(Value::is_null) {
                    return Some(format!("REQUIRED_FIELD_MISSING: Required fields are missing: [{}]", field));
                }
            }
        }
        self.rejections
            .iter()
            .find(|r| {
                r.object_type == object_type
                    && match (&r.value, fields.get(&r.field)) {
                        (Some(expected), Some(value)) => value == expected,
                        (None, Some(value)) => !value.is_null(),
                        (_, None) => false,
                    }
            })
            .map(|r| r.message.clone())
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable {
            return Err(MigrateError::Unreachable("organization is offline".to_string()));
        }
        Ok(())
    }
}

/// In-memory organization.
///
/// Serves as catalog, record source and target store at once. Besides
/// holding records it can reject payloads, fail fetches, go offline and
/// delay calls, and it counts every call it serves.
#[derive(Clone)]
pub struct MemOrg {
    data: ShareLock<OrgData>,
}

impl Default for MemOrg {
    fn default() -> Self {
        Self::new()
    }
}

impl MemOrg {
    pub fn new() -> Self {
        Self::with_id_field("Id")
    }

    pub fn with_id_field(id_field: &str) -> Self {
        Self {
            data: Arc::new(RwLock::new(OrgData {
                id_field: id_field.to_string(),
                ..Default::default()
            })),
        }
    }

    /// Register the relationship fields of an object type.
    pub fn describe(
        &self,
        object_type: &str,
        relationships: Vec<RelationshipDescriptor>,
    ) {
        let mut data = self.data.write().unwrap();
        data.relationships.insert(object_type.to_string(), relationships);
    }

    /// Store a record under its source id.
    pub fn insert(
        &self,
        record: SourceRecord,
    ) {
        let mut data = self.data.write().unwrap();
        let mut fields = record.fields;
        fields.insert(data.id_field.clone(), Value::String(record.source_id.clone()));
        data.records.entry(record.object_type).or_default().insert(record.source_id, fields);
    }

    /// Refuse creates and updates of `object_type` that omit `field`.
    pub fn require_field(
        &self,
        object_type: &str,
        field: &str,
    ) {
        let mut data = self.data.write().unwrap();
        data.required.entry(object_type.to_string()).or_default().push(field.to_string());
    }

    /// Refuse creates and updates of `object_type` whose `field` equals `value`.
    pub fn reject_when(
        &self,
        object_type: &str,
        field: &str,
        value: impl Into<Value>,
        message: &str,
    ) {
        let mut data = self.data.write().unwrap();
        data.rejections.push(Rejection {
            object_type: object_type.to_string(),
            field: field.to_string(),
            value: Some(value.into()),
            message: message.to_string(),
        });
    }

    /// Refuse creates and updates of `object_type` that set `field` at all.
    pub fn reject_field(
        &self,
        object_type: &str,
        field: &str,
        message: &str,
    ) {
        let mut data = self.data.write().unwrap();
        data.rejections.push(Rejection {
            object_type: object_type.to_string(),
            field: field.to_string(),
            value: None,
            message: message.to_string(),
        });
    }

    /// Make fetches of one record fail.
    pub fn fail_fetch(
        &self,
        object_type: &str,
        id: &str,
    ) {
        let mut data = self.data.write().unwrap();
        data.fetch_failures.insert(RecordKey::new(object_type, id));
    }

    pub fn set_unreachable(
        &self,
        unreachable: bool,
    ) {
        self.data.write().unwrap().unreachable = unreachable;
    }

    /// Delay every create and update call.
    pub fn set_latency(
        &self,
        latency: Option<Duration>,
    ) {
        self.data.write().unwrap().latency = latency;
    }

    pub fn record(
        &self,
        object_type: &str,
        id: &str,
    ) -> Option<SourceRecord> {
        let data = self.data.read().unwrap();
        data.records.get(object_type).and_then(|records| records.get(id)).map(|fields| SourceRecord {
            object_type: object_type.to_string(),
            source_id: id.to_string(),
            fields: fields.clone(),
        })
    }

    /// Records of one object type, ordered by id.
    pub fn records(
        &self,
        object_type: &str,
    ) -> Vec<SourceRecord> {
        let data = self.data.read().unwrap();
        data.records
            .get(object_type)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, fields)| SourceRecord {
                        object_type: object_type.to_string(),
                        source_id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First record of `object_type` whose `field` equals `value`.
    pub fn find(
        &self,
        object_type: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Option<SourceRecord> {
        let value = value.into();
        self.records(object_type).into_iter().find(|r| r.fields.get(field) == Some(&value))
    }

    pub fn count(
        &self,
        object_type: &str,
    ) -> usize {
        let data = self.data.read().unwrap();
        data.records.get(object_type).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn calls(&self) -> CallStats {
        self.data.read().unwrap().calls.clone()
    }

    pub fn update_log(&self) -> Vec<UpdateCall> {
        self.data.read().unwrap().update_log.clone()
    }

    async fn pause(&self) {
        let latency = self.data.read().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn field_matches(
    value: &Value,
    expected: &str,
) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        _ => false,
    }
}

#[async_trait]
impl Catalog for MemOrg {
    async fn describe_relationships(
        &self,
        object_type: &str,
    ) -> Result<Vec<RelationshipDescriptor>> {
        let mut data = self.data.write().unwrap();
        data.calls.describes += 1;
        Ok(data.relationships.get(object_type).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl RecordSource for MemOrg {
    async fn fetch_by_id(
        &self,
        object_type: &str,
        id: &str,
    ) -> Result<Option<SourceRecord>> {
        trace!("mem::fetch_by_id({}, {})", object_type, id);
        {
            let mut data = self.data.write().unwrap();
            data.calls.fetches += 1;
            if data.fetch_failures.contains(&RecordKey::new(object_type, id)) {
                return Err(MigrateError::Source(format!("failed to fetch {} {}", object_type, id)));
            }
        }
        Ok(self.record(object_type, id))
    }

    async fn resolve_type(
        &self,
        candidates: &BTreeSet<ObjectType>,
        id: &str,
    ) -> Result<Option<ObjectType>> {
        let data = self.data.read().unwrap();
        Ok(candidates.iter().find(|c| data.records.get(*c).is_some_and(|records| records.contains_key(id))).cloned())
    }
}

#[async_trait]
impl TargetStore for MemOrg {
    async fn create_many(
        &self,
        object_type: &str,
        payloads: Vec<Fields>,
    ) -> Result<Vec<CreateOutcome>> {
        self.pause().await;

        let mut data = self.data.write().unwrap();
        data.calls.creates += 1;
        data.check_reachable()?;

        let mut outcomes = Vec::with_capacity(payloads.len());
        for mut payload in payloads {
            if let Some(message) = data.validate(object_type, &payload) {
                outcomes.push(Err(message));
                continue;
            }
            let id = utils::shortid();
            payload.insert(data.id_field.clone(), Value::String(id.clone()));
            data.records.entry(object_type.to_string()).or_default().insert(id.clone(), payload);
            data.calls.created += 1;
            outcomes.push(Ok(id));
        }
        Ok(outcomes)
    }

    async fn update_by_id(
        &self,
        object_type: &str,
        target_id: &str,
        fields: Fields,
    ) -> Result<()> {
        self.pause().await;

        let mut data = self.data.write().unwrap();
        data.calls.updates += 1;
        data.check_reachable()?;
        data.update_log.push(UpdateCall {
            object_type: object_type.to_string(),
            target_id: target_id.to_string(),
            fields: fields.clone(),
        });

        let Some(mut merged) = data.records.get(object_type).and_then(|records| records.get(target_id)).cloned() else {
            return Err(MigrateError::Store(format!("ENTITY_IS_DELETED: {} {} does not exist", object_type, target_id)));
        };
        merged.extend(fields);
        if let Some(message) = data.validate(object_type, &merged) {
            return Err(MigrateError::Store(message));
        }
        data.records.entry(object_type.to_string()).or_default().insert(target_id.to_string(), merged);
        Ok(())
    }

    async fn query_by_field(
        &self,
        object_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<TargetId>> {
        let mut data = self.data.write().unwrap();
        data.calls.queries += 1;
        data.check_reachable()?;

        Ok(data
            .records
            .get(object_type)
            .and_then(|records| records.iter().find(|(_, fields)| fields.get(field).is_some_and(|v| field_matches(v, value))))
            .map(|(id, _)| id.clone()))
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::{Fields, MigrateError, RecordSource, SourceRecord, TargetStore};

    use super::MemOrg;

    fn payload(name: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("Name".to_string(), json!(name));
        fields
    }

    #[tokio::test]
    async fn test_create_reports_each_outcome() {
        let org = MemOrg::new();
        org.reject_when("Account", "Name", "Bad", "FIELD_CUSTOM_VALIDATION_EXCEPTION: bad name");

        let outcomes = org.create_many("Account", vec![payload("Good"), payload("Bad"), payload("Fine")]).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1].as_ref().unwrap_err(), "FIELD_CUSTOM_VALIDATION_EXCEPTION: bad name");
        assert!(outcomes[2].is_ok());
        assert_eq!(org.count("Account"), 2);

        let id = outcomes[0].as_ref().unwrap();
        let stored = org.record("Account", id).unwrap();
        assert_eq!(stored.fields["Id"], json!(id));
        assert_eq!(org.query_by_field("Account", "Name", "Fine").await.unwrap(), outcomes[2].clone().ok());
    }

    #[tokio::test]
    async fn test_rejected_field_refuses_updates() {
        let org = MemOrg::new();
        org.reject_field("Account", "ParentId", "INVALID_CROSS_REFERENCE_KEY: invalid parent");

        let outcomes = org.create_many("Account", vec![payload("Acme")]).await.unwrap();
        let id = outcomes[0].clone().unwrap();

        let mut fields = Fields::new();
        fields.insert("ParentId".to_string(), json!("001T"));
        let err = org.update_by_id("Account", &id, fields).await.unwrap_err();
        assert_eq!(err, MigrateError::Store("INVALID_CROSS_REFERENCE_KEY: invalid parent".to_string()));
        assert!(!org.record("Account", &id).unwrap().fields.contains_key("ParentId"));
    }

    #[tokio::test]
    async fn test_required_field_enforced() {
        let org = MemOrg::new();
        org.require_field("Contact", "AccountId");
        let outcomes = org.create_many("Contact", vec![payload("Doe")]).await.unwrap();
        assert!(outcomes[0].as_ref().unwrap_err().starts_with("REQUIRED_FIELD_MISSING"));
    }

    #[tokio::test]
    async fn test_unreachable_is_fatal() {
        let org = MemOrg::new();
        org.set_unreachable(true);
        let err = org.create_many("Account", vec![payload("Acme")]).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(org.query_by_field("Account", "Name", "Acme").await, Err(MigrateError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_fetch_and_fetch_failure() {
        let org = MemOrg::new();
        org.insert(SourceRecord::new("Account", "001A").with_field("Name", "Acme"));
        org.fail_fetch("Account", "001B");

        let fetched = org.fetch_by_id("Account", "001A").await.unwrap().unwrap();
        assert_eq!(fetched.fields["Name"], json!("Acme"));
        assert!(org.fetch_by_id("Account", "001C").await.unwrap().is_none());
        assert!(org.fetch_by_id("Account", "001B").await.is_err());
        assert_eq!(org.calls().fetches, 3);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let org = MemOrg::new();
        org.insert(SourceRecord::new("Account", "001A").with_field("Name", "Acme"));

        let mut fields = Fields::new();
        fields.insert("ParentId".to_string(), json!("001Z"));
        org.update_by_id("Account", "001A", fields).await.unwrap();

        let record = org.record("Account", "001A").unwrap();
        assert_eq!(record.fields["Name"], json!("Acme"));
        assert_eq!(record.fields["ParentId"], json!("001Z"));
        assert_eq!(org.update_log().len(), 1);

        assert!(org.update_by_id("Account", "missing", Fields::new()).await.is_err());
    }
}
