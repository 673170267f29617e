//! Dependency inference and ordering
//!
//! Edges read "must precede". A change that depends on another is ordered
//! after it, except when the other change is a delete: whatever references a
//! resource has to move away from it (or be deleted itself) first.

use crate::change::{Change, ChangeAction};
use crate::error::{Error, Result};
use crate::policy::PlanPolicy;
use crate::types::ResourceConfig;
use std::collections::{BTreeMap, BTreeSet};

/// Directed acyclic "must precede" relation over change identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// node -> nodes that must precede it
    before: BTreeMap<String, BTreeSet<String>>,
    /// node -> nodes that must follow it
    after: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str) {
        self.before.entry(id.to_string()).or_default();
        self.after.entry(id.to_string()).or_default();
    }

    /// Record that `first` must complete before `then`. Self-edges are ignored.
    pub fn add_edge(&mut self, first: &str, then: &str) {
        if first == then {
            return;
        }
        self.add_node(first);
        self.add_node(then);
        if let Some(deps) = self.before.get_mut(then) {
            deps.insert(first.to_string());
        }
        if let Some(dependents) = self.after.get_mut(first) {
            dependents.insert(then.to_string());
        }
    }

    /// Identifiers of all nodes, sorted
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.before.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.before.len()
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
    }

    /// Number of "must precede" edges
    pub fn edge_count(&self) -> usize {
        self.before.values().map(BTreeSet::len).sum()
    }

    /// Changes that must complete before `id`
    pub fn dependencies_of(&self, id: &str) -> BTreeSet<String> {
        self.before.get(id).cloned().unwrap_or_default()
    }

    /// Changes that must wait for `id`
    pub fn dependents_of(&self, id: &str) -> BTreeSet<String> {
        self.after.get(id).cloned().unwrap_or_default()
    }

    pub fn has_dependents(&self, id: &str) -> bool {
        self.after.get(id).is_some_and(|d| !d.is_empty())
    }

    /// Every node reachable from `id` along "must precede" edges.
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(node) = stack.pop() {
            for next in self.after.get(&node).into_iter().flatten() {
                if seen.insert(next.clone()) {
                    stack.push(next.clone());
                }
            }
        }
        seen
    }

    /// Order nodes so every node follows all of its dependencies.
    ///
    /// Ready nodes are taken in key order, so the result is deterministic.
    /// Fails with `DependencyCycle` naming the nodes on or between cycles;
    /// no partial order is returned.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .before
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.before.len());

        while let Some(node) = ready.pop_first() {
            order.push(node.to_string());
            for next in self.after.get(node).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(next.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(next.as_str());
                    }
                }
            }
        }

        if order.len() < self.before.len() {
            let change_ids = self.cycle_members(&order);
            log::warn!("Dependency cycle among changes: {}", change_ids.join(", "));
            return Err(Error::DependencyCycle { change_ids });
        }
        Ok(order)
    }

    /// Nodes left after Kahn's pass, minus those merely downstream of a cycle.
    fn cycle_members(&self, ordered: &[String]) -> Vec<String> {
        let done: BTreeSet<&str> = ordered.iter().map(String::as_str).collect();
        let mut remaining: BTreeSet<&str> = self
            .before
            .keys()
            .map(String::as_str)
            .filter(|id| !done.contains(id))
            .collect();

        // Peel off nodes with no remaining dependents; they cannot close a loop.
        loop {
            let sinks: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|id| {
                    self.after
                        .get(*id)
                        .is_none_or(|next| next.iter().all(|n| !remaining.contains(n.as_str())))
                })
                .collect();
            if sinks.is_empty() {
                break;
            }
            for sink in sinks {
                remaining.remove(sink);
            }
        }
        remaining.into_iter().map(str::to_string).collect()
    }

    /// Infer the graph for a set of changes.
    ///
    /// Sources of edges, merged:
    /// - dependencies already present on a change (must name another change
    ///   in the set)
    /// - a configuration referencing another change's resource key, directly
    ///   or through an ARN ending in it, or via `depends_on`
    /// - `type_dependencies` in the policy
    pub fn analyze(changes: &[Change], policy: &PlanPolicy) -> Result<Self> {
        let ids: BTreeSet<&str> = changes.iter().map(Change::id).collect();
        let mut graph = Self::new();
        for change in changes {
            graph.add_node(change.id());
        }

        for change in changes {
            for dep in &change.dependencies {
                if dep == change.id() || !ids.contains(dep.as_str()) {
                    return Err(Error::validation(
                        format!(
                            "change {} depends on {dep}, which is not another change in the plan",
                            change.id()
                        ),
                        vec![change.id().to_string()],
                    ));
                }
                graph.add_edge(dep, change.id());
            }
        }

        let by_id: BTreeMap<&str, &Change> = changes.iter().map(|c| (c.id(), c)).collect();
        for change in changes {
            let desired_refs = change
                .desired_config
                .as_ref()
                .map(|cfg| references(cfg, &ids, policy))
                .unwrap_or_default();
            let current_refs = change
                .current_config
                .as_ref()
                .map(|cfg| references(cfg, &ids, policy))
                .unwrap_or_default();

            for (&other_id, other) in &by_id {
                if other_id == change.id() {
                    continue;
                }
                let by_type = policy.type_depends_on(&change.resource_type, &other.resource_type);
                match (change.action, other.action) {
                    (_, ChangeAction::Delete) => {
                        if by_type
                            || desired_refs.contains(other_id)
                            || current_refs.contains(other_id)
                        {
                            graph.add_edge(change.id(), other_id);
                        }
                    }
                    (ChangeAction::Delete, _) => {}
                    _ => {
                        if by_type || desired_refs.contains(other_id) {
                            graph.add_edge(other_id, change.id());
                        }
                    }
                }
            }
        }

        log::debug!(
            "Dependency graph: {} changes, {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }
}

/// Keys of other changes that `config` references.
fn references<'a>(
    config: &ResourceConfig,
    ids: &BTreeSet<&'a str>,
    policy: &PlanPolicy,
) -> BTreeSet<&'a str> {
    let mut leaves = Vec::new();
    for (key, value) in &config.properties {
        if policy.is_reference_field(key) {
            value.string_leaves(&mut leaves);
        }
    }
    let declared = config.depends_on.iter().map(String::as_str);

    leaves
        .into_iter()
        .map(referenced_key)
        .chain(declared)
        .filter(|key| *key != config.id)
        .filter_map(|key| ids.get(key).copied())
        .collect()
}

/// The resource key a property value points at.
///
/// ARNs point at their final path segment; other strings at themselves.
fn referenced_key(value: &str) -> &str {
    if value.starts_with("arn:") {
        let resource = value.rsplit(':').next().unwrap_or(value);
        resource.rsplit('/').next().unwrap_or(resource)
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(id: &str, ty: &str) -> ResourceConfig {
        ResourceConfig::new(id, ty, "us-east-1")
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_reference_orders_referent_first() {
        let changes = vec![
            Change::create(cfg("b", "instance").with_property("network", "a")),
            Change::create(cfg("a", "network")),
        ];
        let graph = DependencyGraph::analyze(&changes, &PlanPolicy::default()).unwrap();
        assert_eq!(graph.dependencies_of("b"), ["a".to_string()].into());
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_arn_reference() {
        let changes = vec![
            Change::create(cfg("web", "instance").with_property("role", "arn:iam::123:role/web-role")),
            Change::create(cfg("web-role", "role")),
        ];
        let graph = DependencyGraph::analyze(&changes, &PlanPolicy::default()).unwrap();
        assert!(graph.has_dependents("web-role"));
    }

    #[test]
    fn test_reference_fields_restrict_scanning() {
        let policy = PlanPolicy {
            reference_fields: ["subnet".to_string()].into(),
            ..Default::default()
        };
        let changes = vec![
            Change::create(cfg("b", "instance").with_property("description", "a")),
            Change::create(cfg("a", "network")),
        ];
        let graph = DependencyGraph::analyze(&changes, &policy).unwrap();
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_type_rules() {
        let policy = PlanPolicy {
            type_dependencies: [("instance".to_string(), ["network".to_string()].into())].into(),
            ..Default::default()
        };
        let changes = vec![
            Change::create(cfg("app", "instance")),
            Change::create(cfg("net", "network")),
        ];
        let order = DependencyGraph::analyze(&changes, &policy)
            .unwrap()
            .topological_order()
            .unwrap();
        assert_eq!(order, vec!["net", "app"]);
    }

    #[test]
    fn test_deletes_remove_referrer_first() {
        let changes = vec![
            Change::delete(cfg("a", "network")),
            Change::delete(cfg("b", "instance").with_property("network", "a")),
        ];
        let order = DependencyGraph::analyze(&changes, &PlanPolicy::default())
            .unwrap()
            .topological_order()
            .unwrap();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_update_moving_away_precedes_delete() {
        let current = cfg("b", "instance").with_property("network", "a");
        let desired = cfg("b", "instance").with_property("network", "c");
        let changes = vec![
            Change::delete(cfg("a", "network")),
            Change::update(current, desired),
            Change::create(cfg("c", "network")),
        ];
        let order = DependencyGraph::analyze(&changes, &PlanPolicy::default())
            .unwrap()
            .topological_order()
            .unwrap();
        assert!(position(&order, "c") < position(&order, "b"));
        assert!(position(&order, "b") < position(&order, "a"));
    }

    #[test]
    fn test_declared_depends_on() {
        let mut app = cfg("app", "instance");
        app.depends_on.insert("db".into());
        let changes = vec![Change::create(app), Change::create(cfg("db", "database"))];
        let graph = DependencyGraph::analyze(&changes, &PlanPolicy::default()).unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec!["db", "app"]);
    }

    #[test]
    fn test_preset_dependency_outside_plan_rejected() {
        let mut change = Change::create(cfg("a", "t"));
        change.dependencies.insert("ghost".into());
        let err = DependencyGraph::analyze(&[change], &PlanPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed { change_ids, .. } if change_ids == ["a"]));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut change = Change::create(cfg("a", "t"));
        change.dependencies.insert("a".into());
        assert!(DependencyGraph::analyze(&[change], &PlanPolicy::default()).is_err());
    }

    #[test]
    fn test_self_reference_is_not_an_edge() {
        let changes = vec![Change::create(cfg("a", "t").with_property("self", "a"))];
        let graph = DependencyGraph::analyze(&changes, &PlanPolicy::default()).unwrap();
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_cycle_detected_and_named() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("c", "a");
        graph.add_edge("c", "d");
        graph.add_node("e");
        let err = graph.topological_order().unwrap_err();
        match err {
            Error::DependencyCycle { change_ids } => assert_eq!(change_ids, vec!["a", "b", "c"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_from_references() {
        let changes = vec![
            Change::create(cfg("a", "t").with_property("peer", "b")),
            Change::create(cfg("b", "t").with_property("peer", "a")),
        ];
        let graph = DependencyGraph::analyze(&changes, &PlanPolicy::default()).unwrap();
        assert!(matches!(
            graph.topological_order(),
            Err(Error::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_order_respects_every_dependency() {
        let mut graph = DependencyGraph::new();
        for (a, b) in [("n1", "n3"), ("n2", "n3"), ("n3", "n5"), ("n4", "n5"), ("n1", "n4")] {
            graph.add_edge(a, b);
        }
        let order = graph.topological_order().unwrap();
        for node in graph.nodes() {
            for dep in graph.dependencies_of(node) {
                assert!(position(&order, &dep) < position(&order, node));
            }
        }
        assert_eq!(graph.transitive_dependents("n1"), ["n3", "n4", "n5"].map(String::from).into());
    }

    #[test]
    fn test_referenced_key() {
        assert_eq!(referenced_key("arn:aws:ec2:us-east-1:123:subnet/subnet-1"), "subnet-1");
        assert_eq!(referenced_key("arn:aws:s3:::bucket"), "bucket");
        assert_eq!(referenced_key("plain"), "plain");
    }
}
