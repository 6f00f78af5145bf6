use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    model::{FieldName, RecordKey, SourceRecord},
    result::ErrorKind,
};

/// Key lookup captured for a match-by-key field, resolved against the target at execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeyReference {
    /// Explicit key field; `None` means identifier-based resolution.
    pub key_field: Option<FieldName>,
    /// The parent's value of `key_field`, or its source id when there is no key field.
    pub key_value: String,
    /// Default key field of the parent type and the parent's value for it,
    /// tried when identifier-based resolution finds nothing.
    pub fallback: Option<(FieldName, String)>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Parent is created earlier in the plan; ordered by the topological sort.
    Include,
    /// Parent is created in the same stage or later; the field is set by a
    /// post-creation update. Self references are always deferred.
    Deferred,
    /// Parent already exists at the target and is found by key.
    MatchByKey(KeyReference),
}

/// One relationship field of a node that will carry a value into the target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference {
    pub field_name: FieldName,
    /// Parent record: concrete object type and source id.
    pub target: RecordKey,
    pub required: bool,
    pub kind: ReferenceKind,
}

/// Non-fatal problem found while building the graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeWarning {
    pub kind: ErrorKind,
    pub field_name: FieldName,
    pub message: String,
}

/// A source record plus everything needed to create it at the target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecordNode {
    pub record: SourceRecord,
    /// Selected by the user rather than discovered through a relationship.
    pub is_root: bool,
    /// Relationship fields with a non-blank value and an action other than skip.
    pub references: Vec<Reference>,
    /// Fields that never reach a payload: every relationship field (re-added
    /// only once resolved) and excluded fields.
    pub dropped_fields: BTreeSet<FieldName>,
    pub warnings: Vec<NodeWarning>,
    /// Required include fields whose parent could not be fetched.
    pub unresolved_required: Vec<FieldName>,
}

impl RecordNode {
    pub fn new(
        record: SourceRecord,
        is_root: bool,
    ) -> Self {
        Self {
            record,
            is_root,
            references: Vec::new(),
            dropped_fields: BTreeSet::new(),
            warnings: Vec::new(),
            unresolved_required: Vec::new(),
        }
    }

    pub fn key(&self) -> RecordKey {
        self.record.key()
    }

    pub fn reference(
        &self,
        field_name: &str,
    ) -> Option<&Reference> {
        self.references.iter().find(|r| r.field_name == field_name)
    }

    pub(crate) fn warn(
        &mut self,
        kind: ErrorKind,
        field_name: &str,
        message: String,
    ) {
        self.warnings.push(NodeWarning {
            kind,
            field_name: field_name.to_string(),
            message,
        });
    }
}
