use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{FieldName, ObjectType};

/// A reference-typed field of an object type, as described by the catalog.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    pub field_name: FieldName,
    pub field_label: String,
    /// Allowed target object types; several for polymorphic fields.
    pub target_object_types: BTreeSet<ObjectType>,
    pub is_required: bool,
    pub is_creatable: bool,
}

impl RelationshipDescriptor {
    pub fn new<I, T>(
        field_name: impl Into<FieldName>,
        target_object_types: I,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ObjectType>,
    {
        let field_name = field_name.into();
        Self {
            field_label: field_name.clone(),
            field_name,
            target_object_types: target_object_types.into_iter().map(Into::into).collect(),
            is_required: false,
            is_creatable: true,
        }
    }

    pub fn label(
        mut self,
        label: impl Into<String>,
    ) -> Self {
        self.field_label = label.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.is_creatable = false;
        self
    }

    pub fn is_polymorphic(&self) -> bool {
        self.target_object_types.len() > 1
    }

    /// The only target type, for non-polymorphic fields.
    pub fn single_target(&self) -> Option<&ObjectType> {
        if self.target_object_types.len() == 1 {
            self.target_object_types.iter().next()
        } else {
            None
        }
    }
}
