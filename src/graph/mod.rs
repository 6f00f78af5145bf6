//! Record dependency graph.
//!
//! The graph holds exactly one [`RecordNode`] per (object type, source id) and
//! two edge sets: ordinary child -> parent [`DependencyEdge`]s, which order
//! object types, and deferred edges, which are patched after creation and
//! never take part in ordering.

mod builder;
mod node;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{FieldName, ObjectType, RecordKey, SourceId};

pub use builder::GraphBuilder;
pub use node::{KeyReference, NodeWarning, RecordNode, Reference, ReferenceKind};

/// "child cannot be created before parent's target identifier is known".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyEdge {
    pub child: RecordKey,
    pub parent: RecordKey,
    pub field_name: FieldName,
    pub required: bool,
}

impl DependencyEdge {
    pub fn is_self_type(&self) -> bool {
        self.child.object_type == self.parent.object_type
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RecordGraph {
    /// Nodes grouped by object type, then source id.
    pub nodes: BTreeMap<ObjectType, BTreeMap<SourceId, RecordNode>>,
    pub edges: BTreeSet<DependencyEdge>,
    pub deferred: BTreeSet<DependencyEdge>,
}

impl RecordGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(
        &self,
        key: &RecordKey,
    ) -> bool {
        self.node(key).is_some()
    }

    pub fn node(
        &self,
        key: &RecordKey,
    ) -> Option<&RecordNode> {
        self.nodes.get(&key.object_type).and_then(|nodes| nodes.get(&key.source_id))
    }

    /// Insert a node; an existing node with the same key is kept.
    pub fn insert(
        &mut self,
        node: RecordNode,
    ) -> bool {
        let key = node.key();
        let nodes = self.nodes.entry(key.object_type).or_default();
        if nodes.contains_key(&key.source_id) {
            return false;
        }
        nodes.insert(key.source_id, node);
        true
    }

    pub fn node_count(&self) -> usize {
        self.nodes.values().map(BTreeMap::len).sum()
    }

    pub fn object_types(&self) -> impl Iterator<Item = &ObjectType> {
        self.nodes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordNode> {
        self.nodes.values().flat_map(BTreeMap::values)
    }

    pub(crate) fn add_edge(
        &mut self,
        edge: DependencyEdge,
    ) {
        if edge.is_self_type() {
            self.deferred.insert(edge);
        } else {
            self.edges.insert(edge);
        }
    }
}
