use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{MigrateError, Result};

/// Schema category a record belongs to.
pub type ObjectType = String;
/// Field name within an object type.
pub type FieldName = String;
/// Identifier of a record in the source organization.
pub type SourceId = String;
/// Identifier of a record in the target organization.
pub type TargetId = String;
/// Field values of a record, ordered by field name.
pub type Fields = BTreeMap<FieldName, Value>;

/// Identity of a record within a migration: unique per (object type, source id).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub object_type: ObjectType,
    pub source_id: SourceId,
}

impl RecordKey {
    pub fn new(
        object_type: impl Into<ObjectType>,
        source_id: impl Into<SourceId>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.object_type, self.source_id)
    }
}

/// A record read from the source organization.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub object_type: ObjectType,
    pub source_id: SourceId,
    #[serde(default)]
    pub fields: Fields,
}

impl SourceRecord {
    pub fn new(
        object_type: impl Into<ObjectType>,
        source_id: impl Into<SourceId>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            source_id: source_id.into(),
            fields: Fields::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(
        mut self,
        name: impl Into<FieldName>,
        value: impl Into<Value>,
    ) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.object_type.clone(), self.source_id.clone())
    }

    /// The identifier stored in `field`, or `None` when it is missing or blank.
    pub fn reference_value(
        &self,
        field: &str,
    ) -> Option<String> {
        match self.fields.get(field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Human-identifiable reference, e.g. `Account 001A (Name: Acme)`.
    pub fn display_ref(
        &self,
        display_fields: &[String],
    ) -> String {
        let labels = display_fields
            .iter()
            .filter_map(|f| match self.fields.get(f) {
                Some(Value::String(s)) if !s.is_empty() => Some(format!("{}: {}", f, s)),
                Some(Value::Number(n)) => Some(format!("{}: {}", f, n)),
                _ => None,
            })
            .collect::<Vec<_>>();

        if labels.is_empty() {
            format!("{} {}", self.object_type, self.source_id)
        } else {
            format!("{} {} ({})", self.object_type, self.source_id, labels.join(", "))
        }
    }

    /// Parse a JSON array of records.
    pub fn list_from_json(s: &str) -> Result<Vec<SourceRecord>> {
        serde_json::from_str::<Vec<SourceRecord>>(s).map_err(|e| MigrateError::Convert(format!("invalid record list: {}", e)))
    }
}
