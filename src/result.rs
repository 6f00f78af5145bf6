//! Outcome of one migration run.
//!
//! A [`MigrationResult`] is append-only while the run executes and final once
//! it returns. It is the authoritative record of what was created, including
//! after a cancellation or a fatal store fault.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::model::{FieldName, ObjectType, RecordKey, TargetId};

/// Category of a per-record problem. None of these stop a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::AsRefStr)]
pub enum ErrorKind {
    /// A related record could not be fetched; the relationship was dropped.
    RelatedRecordFetchFailed,
    /// No target record matched the key of a match-by-key field.
    ExternalKeyNotFound,
    /// A required include relationship has no parent in the plan.
    MissingRequiredDependency,
    /// A parent this record references was not created, so the record was not attempted.
    ParentNotCreated,
    /// The target store rejected the create.
    RecordCreateFailed,
    /// The target store rejected a deferred reference update.
    RecordUpdateFailed,
}

/// One per-record problem, keyed to a human-identifiable source reference.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub kind: ErrorKind,
    pub record: RecordKey,
    /// e.g. `Account 001A (Name: Acme)`
    pub source_ref: String,
    pub field_name: Option<FieldName>,
    pub message: String,
}

impl RecordError {
    pub fn new(
        kind: ErrorKind,
        record: RecordKey,
        source_ref: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            record,
            source_ref: source_ref.into(),
            field_name: None,
            message: message.into(),
        }
    }

    pub fn on_field(
        mut self,
        field_name: impl Into<FieldName>,
    ) -> Self {
        self.field_name = Some(field_name.into());
        self
    }
}

impl fmt::Display for RecordError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.field_name {
            Some(field) => write!(f, "[{}] {} ({}): {}", self.kind.as_ref(), self.source_ref, field, self.message),
            None => write!(f, "[{}] {}: {}", self.kind.as_ref(), self.source_ref, self.message),
        }
    }
}

/// Counters and messages of one object type.
///
/// `inserted`/`failed` count creates. `updated`/`update_failed` count the
/// deferred reference updates issued after all stages.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectResult {
    pub inserted: usize,
    pub failed: usize,
    pub updated: usize,
    pub update_failed: usize,
    pub errors: Vec<RecordError>,
}

impl ObjectResult {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    pub fn errors_of(
        &self,
        kind: ErrorKind,
    ) -> impl Iterator<Item = &RecordError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }
}

/// How a run ended.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// Every stage and the deferred update pass ran.
    #[default]
    Completed,
    /// Stopped on request after `completed_stages` stages.
    Cancelled {
        completed_stages: usize,
    },
    /// The target store became unreachable; the session is over.
    Aborted {
        error: String,
    },
}

/// Source record -> newly created target record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Remapping {
    pub record: RecordKey,
    pub target_id: TargetId,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationResult {
    pub run_id: String,
    pub status: RunStatus,
    pub objects: BTreeMap<ObjectType, ObjectResult>,
    /// Every record created by the run, ordered by source key.
    pub remapped: Vec<Remapping>,
    pub start_time: i64,
    pub end_time: i64,
}

impl MigrationResult {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    pub fn object(
        &self,
        object_type: &str,
    ) -> Option<&ObjectResult> {
        self.objects.get(object_type)
    }

    pub fn object_mut(
        &mut self,
        object_type: &str,
    ) -> &mut ObjectResult {
        self.objects.entry(object_type.to_string()).or_default()
    }

    /// Record an error against the object type of its record.
    pub fn push_error(
        &mut self,
        error: RecordError,
    ) {
        let object_type = error.record.object_type.clone();
        self.object_mut(&object_type).errors.push(error);
    }

    pub fn target_id(
        &self,
        record: &RecordKey,
    ) -> Option<&TargetId> {
        self.remapped.iter().find(|r| &r.record == record).map(|r| &r.target_id)
    }

    pub fn inserted(&self) -> usize {
        self.objects.values().map(|o| o.inserted).sum()
    }

    pub fn failed(&self) -> usize {
        self.objects.values().map(|o| o.failed).sum()
    }

    pub fn errors(&self) -> impl Iterator<Item = &RecordError> {
        self.objects.values().flat_map(|o| o.errors.iter())
    }

    /// Completed without any failed create or update.
    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Completed && self.objects.values().all(|o| o.failed == 0 && o.update_failed == 0)
    }

    /// Output a human-readable summary of the run
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let status = match &self.status {
            RunStatus::Completed => "completed".to_string(),
            RunStatus::Cancelled {
                completed_stages,
            } => format!("cancelled after {} stage(s)", completed_stages),
            RunStatus::Aborted {
                error,
            } => format!("aborted: {}", error),
        };
        lines.push(format!("=== Migration {} ({}) ===", self.run_id, status));
        lines.push(format!("Inserted: {}, Failed: {}", self.inserted(), self.failed()));
        lines.push(String::new());

        for (object_type, result) in &self.objects {
            lines.push(format!(
                "{}: inserted {}, failed {}, updated {}, update failed {}",
                object_type, result.inserted, result.failed, result.updated, result.update_failed
            ));
            for message in result.error_messages() {
                lines.push(format!("  {}", message));
            }
        }

        lines.join("\n")
    }
}
