//! Event types for migration runs.
//!
//! Events are emitted while a plan executes to notify subscribers about
//! stage boundaries, per-record outcomes and the end of the run.

use crate::{
    model::{ObjectType, RecordKey, TargetId},
    result::{ErrorKind, RunStatus},
};

/// Generic event wrapper.
#[derive(Debug, Clone)]
pub struct Event<T> {
    inner: T,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationEvent {
    RunStarted {
        stages: usize,
        records: usize,
    },
    StageStarted {
        records: usize,
    },
    RecordCreated {
        record: RecordKey,
        target_id: TargetId,
    },
    RecordFailed {
        record: RecordKey,
        kind: ErrorKind,
        message: String,
    },
    StageFinished {
        inserted: usize,
        failed: usize,
    },
    RecordUpdated {
        record: RecordKey,
        target_id: TargetId,
    },
    UpdateFailed {
        record: RecordKey,
        message: String,
    },
    RunFinished {
        status: RunStatus,
    },
}

/// Event message containing run and stage context.
#[derive(Debug, Clone)]
pub struct Message {
    pub run_id: String,
    /// Object type of the stage (empty for run-level events).
    pub object_type: ObjectType,
    pub event: MigrationEvent,
}

impl<T> std::ops::Deref for Event<T>
where
    T: std::fmt::Debug + Clone,
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Event<T>
where
    T: std::fmt::Debug + Clone,
{
    pub fn new(inner: &T) -> Self {
        Self {
            inner: inner.clone(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl MigrationEvent {
    pub fn str(&self) -> &str {
        match self {
            MigrationEvent::RunStarted {
                ..
            } => "RunStarted",
            MigrationEvent::StageStarted {
                ..
            } => "StageStarted",
            MigrationEvent::RecordCreated {
                ..
            } => "RecordCreated",
            MigrationEvent::RecordFailed {
                ..
            } => "RecordFailed",
            MigrationEvent::StageFinished {
                ..
            } => "StageFinished",
            MigrationEvent::RecordUpdated {
                ..
            } => "RecordUpdated",
            MigrationEvent::UpdateFailed {
                ..
            } => "UpdateFailed",
            MigrationEvent::RunFinished {
                ..
            } => "RunFinished",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, MigrationEvent::RunFinished { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, MigrationEvent::RecordFailed { .. } | MigrationEvent::UpdateFailed { .. })
    }
}
