use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::{
    Direction,
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};
use tracing::{debug, warn};

use crate::{
    MigrateError, Result,
    graph::{DependencyEdge, RecordGraph, RecordNode, ReferenceKind},
    model::{ObjectType, RecordKey, SourceId},
    plan::{DeferredUpdate, Plan, PlanIssue},
    result::ErrorKind,
};

type Nodes = BTreeMap<ObjectType, BTreeMap<SourceId, RecordNode>>;

/// Object types linked parent -> child by include edges.
struct TypeGraph {
    graph: DiGraph<ObjectType, ()>,
    index: HashMap<ObjectType, NodeIndex>,
}

impl TypeGraph {
    fn new<'a>(
        types: impl Iterator<Item = &'a ObjectType>,
        edges: impl Iterator<Item = &'a DependencyEdge>,
    ) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for object_type in types {
            index.insert(object_type.clone(), graph.add_node(object_type.clone()));
        }
        for edge in edges {
            if let (Some(&parent), Some(&child)) = (index.get(&edge.parent.object_type), index.get(&edge.child.object_type)) {
                graph.update_edge(parent, child, ());
            }
        }

        Self {
            graph,
            index,
        }
    }

    /// Kahn's algorithm; among ready types the smallest name goes first.
    fn order(&self) -> Result<Vec<ObjectType>> {
        let mut in_degree: HashMap<NodeIndex, usize> =
            self.graph.node_indices().map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count())).collect();
        let mut ready: BTreeSet<&ObjectType> = in_degree.iter().filter(|(_, degree)| **degree == 0).map(|(idx, _)| &self.graph[*idx]).collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(object_type) = ready.pop_first() {
            order.push(object_type.clone());
            for child in self.graph.neighbors_directed(self.index[object_type], Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(&self.graph[child]);
                    }
                }
            }
        }

        if order.len() < self.graph.node_count() {
            let object_types = self.cycles().into_iter().flatten().collect::<BTreeSet<_>>().into_iter().collect();
            return Err(MigrateError::CyclicDependency {
                object_types,
            });
        }
        Ok(order)
    }

    /// Strongly connected groups of more than one type.
    fn cycles(&self) -> Vec<BTreeSet<ObjectType>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| scc.into_iter().map(|idx| self.graph[idx].clone()).collect())
            .collect()
    }
}

fn contains(
    nodes: &Nodes,
    key: &RecordKey,
) -> bool {
    nodes.get(&key.object_type).is_some_and(|records| records.contains_key(&key.source_id))
}

/// Compile a record graph into a plan.
///
/// Object types are ordered so that every parent type precedes its child
/// types. A cycle between distinct object types fails with
/// [`MigrateError::CyclicDependency`], unless `defer_optional_cycle_edges`
/// is set and the cycle can be broken by turning its non-required edges into
/// deferred updates.
pub fn compile(
    graph: RecordGraph,
    defer_optional_cycle_edges: bool,
) -> Result<Plan> {
    let RecordGraph {
        mut nodes,
        edges,
        deferred,
    } = graph;
    let mut issues = Vec::new();

    // edges to records outside the graph cannot order anything
    let (mut edges, dangling): (BTreeSet<_>, BTreeSet<_>) = edges.into_iter().partition(|e| contains(&nodes, &e.parent));
    let (mut deferred, dangling_deferred): (BTreeSet<_>, BTreeSet<_>) = deferred.into_iter().partition(|e| contains(&nodes, &e.parent));
    for edge in dangling.iter().chain(dangling_deferred.iter()).filter(|e| e.required) {
        issues.push(PlanIssue {
            kind: ErrorKind::MissingRequiredDependency,
            record: edge.child.clone(),
            field_name: edge.field_name.clone(),
            message: format!("parent {} is not part of the plan", edge.parent),
        });
    }

    if defer_optional_cycle_edges {
        let cycles = TypeGraph::new(nodes.keys(), edges.iter()).cycles();
        let breakable: Vec<DependencyEdge> = edges
            .iter()
            .filter(|e| !e.required && cycles.iter().any(|c| c.contains(&e.child.object_type) && c.contains(&e.parent.object_type)))
            .cloned()
            .collect();

        for edge in breakable {
            edges.remove(&edge);
            if let Some(node) = nodes.get_mut(&edge.child.object_type).and_then(|records| records.get_mut(&edge.child.source_id)) {
                for reference in node.references.iter_mut().filter(|r| r.field_name == edge.field_name) {
                    reference.kind = ReferenceKind::Deferred;
                }
            }
            debug!(child = %edge.child, field = %edge.field_name, parent = %edge.parent, "optional cycle edge deferred");
            deferred.insert(edge);
        }
    }

    let object_order = TypeGraph::new(nodes.keys(), edges.iter()).order().inspect_err(|e| warn!(error = %e, "plan rejected"))?;

    for node in nodes.values().flat_map(BTreeMap::values) {
        for warning in &node.warnings {
            issues.push(PlanIssue {
                kind: warning.kind,
                record: node.key(),
                field_name: warning.field_name.clone(),
                message: warning.message.clone(),
            });
        }
        for field in &node.unresolved_required {
            issues.push(PlanIssue {
                kind: ErrorKind::MissingRequiredDependency,
                record: node.key(),
                field_name: field.clone(),
                message: "required parent could not be resolved".to_string(),
            });
        }
    }

    let deferred_updates = deferred
        .into_iter()
        .map(|e| DeferredUpdate {
            child: e.child,
            field_name: e.field_name,
            parent: e.parent,
        })
        .collect::<Vec<_>>();
    let records_by_type = nodes.into_iter().map(|(object_type, records)| (object_type, records.into_values().collect())).collect();

    let plan = Plan {
        object_order,
        records_by_type,
        deferred_updates,
        issues,
    };
    debug!(
        stages = plan.object_order.len(),
        records = plan.record_count(),
        deferred = plan.deferred_updates.len(),
        issues = plan.issues.len(),
        "plan compiled"
    );
    Ok(plan)
}

#[cfg(test)]
mod test {
    use crate::{
        DependencyEdge, ErrorKind, MigrateError, RecordGraph, RecordKey, RecordNode, Reference, ReferenceKind, SourceRecord,
    };

    use super::compile;

    fn graph(records: &[(&str, &str)]) -> RecordGraph {
        let mut graph = RecordGraph::new();
        for (object_type, id) in records {
            graph.insert(RecordNode::new(SourceRecord::new(*object_type, *id), true));
        }
        graph
    }

    fn link(
        graph: &mut RecordGraph,
        child: (&str, &str),
        field: &str,
        parent: (&str, &str),
        required: bool,
    ) {
        let edge = DependencyEdge {
            child: RecordKey::new(child.0, child.1),
            parent: RecordKey::new(parent.0, parent.1),
            field_name: field.to_string(),
            required,
        };
        let kind = if edge.is_self_type() {
            ReferenceKind::Deferred
        } else {
            ReferenceKind::Include
        };
        let node = graph.nodes.get_mut(child.0).and_then(|records| records.get_mut(child.1)).unwrap();
        node.references.push(Reference {
            field_name: field.to_string(),
            target: edge.parent.clone(),
            required,
            kind,
        });
        graph.add_edge(edge);
    }

    #[test]
    fn test_parent_type_before_child_type() {
        let mut g = graph(&[("Contact", "003A"), ("Account", "001A"), ("Case", "500A")]);
        link(&mut g, ("Contact", "003A"), "AccountId", ("Account", "001A"), true);
        link(&mut g, ("Case", "500A"), "ContactId", ("Contact", "003A"), false);

        let plan = compile(g, false).unwrap();
        assert_eq!(plan.object_order, vec!["Account", "Contact", "Case"]);
        assert_eq!(plan.record_count(), 3);
        assert!(plan.issues.is_empty());
    }

    #[test]
    fn test_unconstrained_types_ordered_by_name() {
        let mut g = graph(&[("Lead", "00QA"), ("Case", "500A"), ("Account", "001A")]);
        link(&mut g, ("Case", "500A"), "LeadId", ("Lead", "00QA"), false);

        let plan = compile(g.clone(), false).unwrap();
        assert_eq!(plan.object_order, vec!["Account", "Lead", "Case"]);
        assert_eq!(compile(g, false).unwrap(), plan);
    }

    #[test]
    fn test_self_reference_only_is_one_stage() {
        let mut g = graph(&[("Account", "001A"), ("Account", "001B")]);
        link(&mut g, ("Account", "001B"), "ParentId", ("Account", "001A"), false);

        let plan = compile(g, false).unwrap();
        assert_eq!(plan.object_order, vec!["Account"]);
        assert_eq!(plan.stage("Account").len(), 2);
        assert_eq!(plan.deferred_updates.len(), 1);
        assert_eq!(plan.deferred_updates[0].child, RecordKey::new("Account", "001B"));
        assert_eq!(plan.deferred_updates[0].parent, RecordKey::new("Account", "001A"));
    }

    #[test]
    fn test_cross_type_cycle_rejected() {
        let mut g = graph(&[("Account", "001A"), ("Contact", "003A"), ("Case", "500A")]);
        link(&mut g, ("Contact", "003A"), "AccountId", ("Account", "001A"), true);
        link(&mut g, ("Account", "001A"), "PrimaryContactId", ("Contact", "003A"), false);
        link(&mut g, ("Case", "500A"), "AccountId", ("Account", "001A"), false);

        let err = compile(g.clone(), false).unwrap_err();
        assert_eq!(
            err,
            MigrateError::CyclicDependency {
                object_types: vec!["Account".to_string(), "Contact".to_string()],
            }
        );
        assert_eq!(err.to_string(), "cyclic dependency between object types: Account, Contact");
    }

    #[test]
    fn test_optional_cycle_edge_deferred_when_enabled() {
        let mut g = graph(&[("Account", "001A"), ("Contact", "003A")]);
        link(&mut g, ("Contact", "003A"), "AccountId", ("Account", "001A"), true);
        link(&mut g, ("Account", "001A"), "PrimaryContactId", ("Contact", "003A"), false);

        let plan = compile(g, true).unwrap();
        assert_eq!(plan.object_order, vec!["Account", "Contact"]);
        assert_eq!(plan.deferred_updates.len(), 1);
        assert_eq!(plan.deferred_updates[0].field_name, "PrimaryContactId");

        let account = &plan.stage("Account")[0];
        assert_eq!(account.reference("PrimaryContactId").unwrap().kind, ReferenceKind::Deferred);
    }

    #[test]
    fn test_required_cycle_still_rejected_when_enabled() {
        let mut g = graph(&[("Account", "001A"), ("Contact", "003A")]);
        link(&mut g, ("Contact", "003A"), "AccountId", ("Account", "001A"), true);
        link(&mut g, ("Account", "001A"), "PrimaryContactId", ("Contact", "003A"), true);

        assert!(matches!(compile(g, true), Err(MigrateError::CyclicDependency { .. })));
    }

    #[test]
    fn test_missing_required_dependency_flagged() {
        let mut g = graph(&[("Contact", "003A")]);
        let node = g.nodes.get_mut("Contact").and_then(|records| records.get_mut("003A")).unwrap();
        node.unresolved_required.push("AccountId".to_string());
        node.warn(ErrorKind::RelatedRecordFetchFailed, "AccountId", "Account/001A not found in source".to_string());

        let plan = compile(g, false).unwrap();
        assert_eq!(plan.object_order, vec!["Contact"]);
        assert_eq!(plan.issues_of(ErrorKind::MissingRequiredDependency).count(), 1);
        assert_eq!(plan.issues_of(ErrorKind::RelatedRecordFetchFailed).count(), 1);

        let summary = plan.summary();
        assert!(summary.contains("[1] Contact (1 records, 1 selected)"));
        assert!(summary.contains("[MissingRequiredDependency] Contact/003A (AccountId): required parent could not be resolved"));
    }
}
