use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::{
    Result,
    catalog::CatalogClient,
    graph::{DependencyEdge, KeyReference, RecordGraph, RecordNode, Reference, ReferenceKind},
    model::{FieldAction, FieldActions, FieldName, ObjectType, RecordKey, RelationshipDescriptor, SourceRecord},
    result::ErrorKind,
    store::RecordSource,
};

type FetchOutcome = std::result::Result<Option<SourceRecord>, String>;

/// State of one `build` call.
struct Walk<'a> {
    actions: &'a FieldActions,
    graph: RecordGraph,
    /// Keys that already have a node or are queued for one.
    seen: HashSet<RecordKey>,
    pending: VecDeque<(SourceRecord, bool)>,
    fetched: HashMap<RecordKey, FetchOutcome>,
}

/// Computes the full set of records to create from root records and field actions.
///
/// Records reached through `include` fields are fetched from the source and
/// expanded in turn until no new record is discovered. A record is fetched at
/// most once per build, so records sharing a parent share its node.
pub struct GraphBuilder {
    catalog: Arc<CatalogClient>,
    source: Arc<dyn RecordSource>,
    default_keys: BTreeMap<ObjectType, FieldName>,
}

impl GraphBuilder {
    pub fn new(
        catalog: Arc<CatalogClient>,
        source: Arc<dyn RecordSource>,
    ) -> Self {
        Self {
            catalog,
            source,
            default_keys: BTreeMap::new(),
        }
    }

    /// Fallback key field per parent type for match-by-key fields without a key field.
    pub fn default_keys(
        mut self,
        default_keys: BTreeMap<ObjectType, FieldName>,
    ) -> Self {
        self.default_keys = default_keys;
        self
    }

    pub async fn build(
        &self,
        roots: Vec<SourceRecord>,
        actions: &FieldActions,
    ) -> Result<RecordGraph> {
        let mut walk = Walk {
            actions,
            graph: RecordGraph::new(),
            seen: HashSet::new(),
            pending: VecDeque::new(),
            fetched: HashMap::new(),
        };

        for root in roots {
            if self.catalog.is_object_excluded(&root.object_type) {
                warn!(record = %root.key(), "root record of an excluded object type ignored");
                continue;
            }
            if walk.seen.insert(root.key()) {
                walk.pending.push_back((root, true));
            }
        }

        while let Some((record, is_root)) = walk.pending.pop_front() {
            let node = self.expand(&mut walk, record, is_root).await?;
            walk.graph.insert(node);
        }

        debug!(
            nodes = walk.graph.node_count(),
            edges = walk.graph.edges.len(),
            deferred = walk.graph.deferred.len(),
            fetches = walk.fetched.len(),
            "record graph built"
        );
        Ok(walk.graph)
    }

    /// Turn one record into a node, queueing newly discovered parents.
    async fn expand(
        &self,
        walk: &mut Walk<'_>,
        record: SourceRecord,
        is_root: bool,
    ) -> Result<RecordNode> {
        let object_type = record.object_type.clone();
        let mut node = RecordNode::new(record, is_root);

        for field in node.record.fields.keys() {
            if self.catalog.is_field_excluded(&object_type, field) {
                node.dropped_fields.insert(field.clone());
            }
        }

        let descriptors = self.catalog.relationships(&object_type).await?;
        for descriptor in descriptors.iter() {
            let field = descriptor.field_name.as_str();
            node.dropped_fields.insert(field.to_string());

            if !descriptor.is_creatable {
                continue;
            }
            let Some(value) = node.record.reference_value(field) else {
                continue;
            };
            if descriptor.target_object_types.iter().all(|t| walk.actions.action_for(&object_type, field, t) == FieldAction::Skip) {
                continue;
            }

            let concrete = match self.concrete_type(descriptor, &value).await {
                Ok(Some(concrete)) => concrete,
                Ok(None) => {
                    let message = format!("no record {} among {:?}", value, descriptor.target_object_types);
                    self.degrade(&mut node, descriptor, message);
                    continue;
                }
                Err(message) => {
                    self.degrade(&mut node, descriptor, message);
                    continue;
                }
            };

            let parent = RecordKey::new(concrete.clone(), value);
            match walk.actions.action_for(&object_type, field, &concrete) {
                FieldAction::Skip => {}
                FieldAction::Include => {
                    if !walk.seen.contains(&parent) {
                        match self.fetch(walk, &parent).await {
                            Ok(Some(record)) => {
                                walk.seen.insert(parent.clone());
                                walk.pending.push_back((record, false));
                            }
                            Ok(None) => {
                                self.degrade(&mut node, descriptor, format!("{} not found in source", parent));
                                continue;
                            }
                            Err(message) => {
                                self.degrade(&mut node, descriptor, message);
                                continue;
                            }
                        }
                    }

                    let edge = DependencyEdge {
                        child: node.key(),
                        parent: parent.clone(),
                        field_name: field.to_string(),
                        required: descriptor.is_required,
                    };
                    let kind = if edge.is_self_type() {
                        ReferenceKind::Deferred
                    } else {
                        ReferenceKind::Include
                    };
                    walk.graph.add_edge(edge);
                    node.references.push(Reference {
                        field_name: field.to_string(),
                        target: parent,
                        required: descriptor.is_required,
                        kind,
                    });
                }
                FieldAction::MatchByKey {
                    key_field,
                } => match self.key_reference(walk, &parent, key_field).await {
                    Ok(key) => node.references.push(Reference {
                        field_name: field.to_string(),
                        target: parent,
                        required: descriptor.is_required,
                        kind: ReferenceKind::MatchByKey(key),
                    }),
                    Err(message) => self.degrade(&mut node, descriptor, message),
                },
            }
        }

        Ok(node)
    }

    /// Downgrade a field to skip for one record.
    fn degrade(
        &self,
        node: &mut RecordNode,
        descriptor: &RelationshipDescriptor,
        message: String,
    ) {
        warn!(record = %node.key(), field = %descriptor.field_name, %message, "related record unavailable, relationship skipped");
        if descriptor.is_required {
            node.unresolved_required.push(descriptor.field_name.clone());
        }
        node.warn(ErrorKind::RelatedRecordFetchFailed, &descriptor.field_name, message);
    }

    async fn concrete_type(
        &self,
        descriptor: &RelationshipDescriptor,
        value: &str,
    ) -> std::result::Result<Option<ObjectType>, String> {
        if let Some(target) = descriptor.single_target() {
            return Ok(Some(target.clone()));
        }
        self.source.resolve_type(&descriptor.target_object_types, value).await.map_err(|e| e.to_string())
    }

    async fn key_reference(
        &self,
        walk: &mut Walk<'_>,
        parent: &RecordKey,
        key_field: Option<FieldName>,
    ) -> std::result::Result<KeyReference, String> {
        match key_field {
            Some(key_field) => {
                let record = self.fetch(walk, parent).await?.ok_or_else(|| format!("{} not found in source", parent))?;
                let key_value = record.reference_value(&key_field).ok_or_else(|| format!("{} has no value for key field {}", parent, key_field))?;
                Ok(KeyReference {
                    key_field: Some(key_field),
                    key_value,
                    fallback: None,
                })
            }
            None => {
                let fallback = match self.default_keys.get(&parent.object_type) {
                    Some(default_key) => match self.fetch(walk, parent).await {
                        Ok(Some(record)) => record.reference_value(default_key).map(|value| (default_key.clone(), value)),
                        _ => None,
                    },
                    None => None,
                };
                Ok(KeyReference {
                    key_field: None,
                    key_value: parent.source_id.clone(),
                    fallback,
                })
            }
        }
    }

    async fn fetch(
        &self,
        walk: &mut Walk<'_>,
        key: &RecordKey,
    ) -> FetchOutcome {
        if let Some(outcome) = walk.fetched.get(key) {
            return outcome.clone();
        }
        let outcome = self.source.fetch_by_id(&key.object_type, &key.source_id).await.map_err(|e| e.to_string());
        walk.fetched.insert(key.clone(), outcome.clone());
        outcome
    }
}
