use std::{collections::HashMap, sync::Arc};

use crate::{
    ShareLock,
    config::ExecutionConfig,
    events::{Message, MigrationEvent},
    model::{FieldName, RecordKey, TargetId},
    resolver::ExternalKeyResolver,
    runtime::Channel,
    store::TargetStore,
};

/// (object type, source id) -> target id of every record created in a run.
///
/// Written only while a stage's outcomes are applied, read by the next
/// stages' payload construction.
#[derive(Clone, Default)]
pub struct RemapTable {
    entries: ShareLock<HashMap<RecordKey, TargetId>>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &self,
        record: RecordKey,
        target_id: TargetId,
    ) {
        self.entries.write().unwrap().insert(record, target_id);
    }

    pub fn get(
        &self,
        record: &RecordKey,
    ) -> Option<TargetId> {
        self.entries.read().unwrap().get(record).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Entries ordered by record key.
    pub fn entries(&self) -> Vec<(RecordKey, TargetId)> {
        let mut entries: Vec<_> = self.entries.read().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort();
        entries
    }
}

/// Everything one migration run shares between its stages and workers.
#[derive(Clone)]
pub struct Context {
    run_id: String,
    remap: RemapTable,
    channel: Arc<Channel>,
    resolver: Arc<ExternalKeyResolver>,
    target: Arc<dyn TargetStore>,
    execution: ExecutionConfig,
    id_field: FieldName,
    display_fields: Arc<Vec<FieldName>>,
}

impl Context {
    pub fn new(
        run_id: String,
        channel: Arc<Channel>,
        resolver: Arc<ExternalKeyResolver>,
        target: Arc<dyn TargetStore>,
        execution: ExecutionConfig,
        id_field: FieldName,
        display_fields: Vec<FieldName>,
    ) -> Self {
        Self {
            run_id,
            remap: RemapTable::new(),
            channel,
            resolver,
            target,
            execution,
            id_field,
            display_fields: Arc::new(display_fields),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn remap(&self) -> &RemapTable {
        &self.remap
    }

    pub fn resolver(&self) -> &ExternalKeyResolver {
        &self.resolver
    }

    pub fn target(&self) -> Arc<dyn TargetStore> {
        self.target.clone()
    }

    pub fn execution(&self) -> &ExecutionConfig {
        &self.execution
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn display_fields(&self) -> &[FieldName] {
        &self.display_fields
    }

    pub fn emit(
        &self,
        object_type: &str,
        event: MigrationEvent,
    ) {
        self.channel.emit(Message {
            run_id: self.run_id.clone(),
            object_type: object_type.to_string(),
            event,
        });
    }
}
