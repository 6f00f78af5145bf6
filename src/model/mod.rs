mod action;
mod record;
mod relationship;

pub use action::{FieldAction, FieldActions, FieldRule};
pub use record::{FieldName, Fields, ObjectType, RecordKey, SourceId, SourceRecord, TargetId};
pub use relationship::RelationshipDescriptor;
