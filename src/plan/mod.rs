//! Migration plan.
//!
//! A [`Plan`] is the reviewable, immutable output of analysis: the order in
//! which object types are created, the records of each stage, the reference
//! updates issued after all stages and the problems found on the way.

mod compiler;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    graph::RecordNode,
    model::{FieldName, ObjectType, RecordKey},
    result::ErrorKind,
};

pub use compiler::compile;

/// A reference field set by an update once both records exist.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeferredUpdate {
    pub child: RecordKey,
    pub field_name: FieldName,
    pub parent: RecordKey,
}

/// Problem surfaced for review before execution. Never blocks execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlanIssue {
    pub kind: ErrorKind,
    pub record: RecordKey,
    pub field_name: FieldName,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Stages in execution order, one object type each.
    pub object_order: Vec<ObjectType>,
    pub records_by_type: BTreeMap<ObjectType, Vec<RecordNode>>,
    /// Ordered by child record.
    pub deferred_updates: Vec<DeferredUpdate>,
    pub issues: Vec<PlanIssue>,
}

impl Plan {
    /// Records of one stage.
    pub fn stage(
        &self,
        object_type: &str,
    ) -> &[RecordNode] {
        self.records_by_type.get(object_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn record_count(&self) -> usize {
        self.records_by_type.values().map(Vec::len).sum()
    }

    pub fn issues_of(
        &self,
        kind: ErrorKind,
    ) -> impl Iterator<Item = &PlanIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// Output a human-readable representation of the plan
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        lines.push("=== Migration Plan ===".to_string());
        lines.push(format!(
            "Stages: {}, Records: {}, Deferred updates: {}, Issues: {}",
            self.object_order.len(),
            self.record_count(),
            self.deferred_updates.len(),
            self.issues.len()
        ));
        lines.push(String::new());

        lines.push("--- Stages ---".to_string());
        for (i, object_type) in self.object_order.iter().enumerate() {
            let records = self.stage(object_type);
            let roots = records.iter().filter(|r| r.is_root).count();
            lines.push(format!("[{}] {} ({} records, {} selected)", i + 1, object_type, records.len(), roots));
        }

        if !self.deferred_updates.is_empty() {
            lines.push(String::new());
            lines.push("--- Deferred updates ---".to_string());
            for update in &self.deferred_updates {
                lines.push(format!("{}.{} -> {}", update.child, update.field_name, update.parent));
            }
        }

        if !self.issues.is_empty() {
            lines.push(String::new());
            lines.push("--- Issues ---".to_string());
            for issue in &self.issues {
                lines.push(format!("[{}] {} ({}): {}", issue.kind.as_ref(), issue.record, issue.field_name, issue.message));
            }
        }

        lines.join("\n")
    }
}
