use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    MigrateError, Result,
    model::{FieldName, ObjectType},
};

/// Treatment of one relationship field.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FieldAction {
    /// Drop the field from the payload.
    #[default]
    Skip,
    /// Carry the parent record along and remap the field to its new identifier.
    Include,
    /// Point the field at an existing target record found by key.
    /// Without a key field the source identifier itself is looked up.
    MatchByKey {
        #[serde(default)]
        key_field: Option<FieldName>,
    },
}

impl FieldAction {
    pub fn match_by_key(key_field: impl Into<FieldName>) -> Self {
        FieldAction::MatchByKey {
            key_field: Some(key_field.into()),
        }
    }

    pub fn match_by_id() -> Self {
        FieldAction::MatchByKey {
            key_field: None,
        }
    }
}

/// Configured action of one field, optionally refined per concrete target type
/// for polymorphic fields.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRule {
    #[serde(default)]
    pub default: FieldAction,
    #[serde(default)]
    pub per_type: BTreeMap<ObjectType, FieldAction>,
}

/// Field actions of a session, keyed by object type then field name.
/// Fields without a configured action are skipped.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct FieldActions {
    rules: BTreeMap<ObjectType, BTreeMap<FieldName, FieldRule>>,
}

impl FieldActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str::<FieldActions>(s).map_err(|e| MigrateError::Config(format!("invalid field actions: {}", e)))
    }

    /// Set the action of a field for every target type.
    pub fn set(
        &mut self,
        object_type: impl Into<ObjectType>,
        field_name: impl Into<FieldName>,
        action: FieldAction,
    ) -> &mut Self {
        self.rule_mut(object_type.into(), field_name.into()).default = action;
        self
    }

    /// Set the action of a polymorphic field for one concrete target type.
    pub fn set_for_type(
        &mut self,
        object_type: impl Into<ObjectType>,
        field_name: impl Into<FieldName>,
        concrete_type: impl Into<ObjectType>,
        action: FieldAction,
    ) -> &mut Self {
        self.rule_mut(object_type.into(), field_name.into()).per_type.insert(concrete_type.into(), action);
        self
    }

    pub fn action_for(
        &self,
        object_type: &str,
        field_name: &str,
        concrete_type: &str,
    ) -> FieldAction {
        self.rules
            .get(object_type)
            .and_then(|fields| fields.get(field_name))
            .map(|rule| rule.per_type.get(concrete_type).unwrap_or(&rule.default).clone())
            .unwrap_or_default()
    }

    fn rule_mut(
        &mut self,
        object_type: ObjectType,
        field_name: FieldName,
    ) -> &mut FieldRule {
        self.rules.entry(object_type).or_default().entry(field_name).or_default()
    }
}
