//! The dependency graph: construction from a [`Registry`] plus the standard
//! library, deterministic cycle breaking, and skip propagation.
//!
//! An edge `a -> b` means "`a` depends on `b`"; `b` must reach a terminal,
//! non-failing result before `a` becomes eligible to run. Skip propagation
//! therefore walks edges in reverse: from a failed vertex to its dependents.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::package::{Package, PackageId, Registry, ensure_known};
use crate::stdlib;
use crate::types::TestResult;

/// A package dependency graph together with the live result of each vertex.
///
/// Node indices are stable for the lifetime of a `DependencyGraph`: vertices
/// are never added or removed after [`DependencyGraph::build`], only edges
/// are (by [`DependencyGraph::break_cycles`]).
pub struct DependencyGraph {
    graph: DiGraph<Package, ()>,
    index_of: HashMap<PackageId, NodeIndex>,
    results: HashMap<PackageId, TestResult>,
    warnings: Vec<GraphWarning>,
}

/// A non-fatal anomaly surfaced during construction, for the caller to write
/// to the event log (see `SPEC_FULL.md` §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphWarning {
    /// A versioned package's `Deps.toml` was missing, unparseable, or had no
    /// entry for the chosen version; it was treated as having zero
    /// dependencies rather than failing the whole build.
    UnloadableDependencyMetadata { package: String },
    /// A dependency cycle was broken by dropping this edge.
    CycleBroken { from: String, to: String },
}

impl DependencyGraph {
    /// Build the graph for `registry`, merging in the standard library.
    ///
    /// A registry package with no `Deps.toml` (or one the descriptor can't
    /// resolve) contributes a vertex with no out-edges and no error; the
    /// caller is expected to have already logged a warning for it (see
    /// `SPEC_FULL.md` §6's "malformed dependency metadata" row). A registry
    /// package naming a dependency id that is *present but unknown to this
    /// graph* is a hard error, since that indicates a corrupt registry rather
    /// than a gap in static metadata.
    pub fn build(registry: &Registry) -> Result<Self> {
        let (stdlib_packages, stdlib_edges) = stdlib::enumerate();

        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        let mut results = HashMap::new();

        for package in stdlib_packages.into_iter().chain(registry.packages.iter().cloned()) {
            let id = package.id;
            // Standard-library packages ship with the runtime and are never
            // sandboxed; they start pre-passed so their dependents become
            // ready immediately rather than waiting on a sandbox run for
            // "core" or "std" that would never be scheduled to begin with.
            let initial = if package.is_stdlib() { TestResult::Passed } else { TestResult::Untested };
            let idx = graph.add_node(package);
            index_of.insert(id, idx);
            results.insert(id, initial);
        }

        let known: HashSet<PackageId> = index_of.keys().copied().collect();
        let mut warnings = Vec::new();

        for (from, to) in stdlib_edges {
            graph.add_edge(index_of[&from], index_of[&to], ());
        }

        for package in &registry.packages {
            if !registry.has_loadable_deps(package) {
                warnings.push(GraphWarning::UnloadableDependencyMetadata { package: package.name.clone() });
            }
            for dep_id in registry.dependencies_of(package) {
                ensure_known(dep_id, &package.name, &known)?;
                graph.add_edge(index_of[&package.id], index_of[&dep_id], ());
            }
        }

        let mut built = DependencyGraph { graph, index_of, results, warnings };
        let removed = built.break_cycles();
        for (from, to) in removed {
            let from_name = built.package(from).map(|p| p.name.clone()).unwrap_or_default();
            let to_name = built.package(to).map(|p| p.name.clone()).unwrap_or_default();
            built.warnings.push(GraphWarning::CycleBroken { from: from_name, to: to_name });
        }
        Ok(built)
    }

    /// Anomalies surfaced while building this graph, in construction order.
    pub fn warnings(&self) -> &[GraphWarning] {
        &self.warnings
    }

    /// Remove the minimum set of edges needed to make the graph acyclic, by
    /// depth-first search in ascending node-index order: whenever a forward
    /// traversal would revisit a vertex still on the current DFS stack, the
    /// closing edge is dropped instead of followed. This is deterministic —
    /// re-running it against the same graph drops the same edges — and
    /// terminates in `O(V + E)`.
    ///
    /// Returns the `(from, to)` package id pairs of every edge removed, for
    /// logging.
    fn break_cycles(&mut self) -> Vec<(PackageId, PackageId)> {
        let mut on_stack = vec![false; self.graph.node_count()];
        let mut visited = vec![false; self.graph.node_count()];
        let mut to_remove = Vec::new();

        let mut order: Vec<NodeIndex> = self.graph.node_indices().collect();
        order.sort_by_key(|idx| idx.index());

        for start in order {
            if !visited[start.index()] {
                self.dfs_break(start, &mut visited, &mut on_stack, &mut to_remove);
            }
        }

        let mut removed = Vec::with_capacity(to_remove.len());
        for edge in &to_remove {
            if let Some((a, b)) = self.graph.edge_endpoints(*edge) {
                removed.push((self.graph[a].id, self.graph[b].id));
            }
        }
        // Remove by index in descending order so earlier removals don't
        // invalidate later `EdgeIndex`es.
        to_remove.sort_by_key(|e| e.index());
        for edge in to_remove.into_iter().rev() {
            self.graph.remove_edge(edge);
        }
        removed
    }

    fn dfs_break(
        &self,
        node: NodeIndex,
        visited: &mut [bool],
        on_stack: &mut [bool],
        to_remove: &mut Vec<petgraph::graph::EdgeIndex>,
    ) {
        visited[node.index()] = true;
        on_stack[node.index()] = true;

        let mut neighbors: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (e.id(), e.target()))
            .collect();
        neighbors.sort_by_key(|(_, target)| target.index());

        for (edge_id, target) in neighbors {
            if on_stack[target.index()] {
                to_remove.push(edge_id);
            } else if !visited[target.index()] {
                self.dfs_break(target, visited, on_stack, to_remove);
            }
        }

        on_stack[node.index()] = false;
    }

    pub fn package(&self, id: PackageId) -> Option<&Package> {
        self.index_of.get(&id).map(|idx| &self.graph[*idx])
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Package> {
        self.graph.node_weights()
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    /// The ids `id` depends on directly.
    pub fn dependencies_of(&self, id: PackageId) -> Vec<PackageId> {
        let Some(&idx) = self.index_of.get(&id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| self.graph[e.target()].id)
            .collect()
    }

    /// The ids that depend on `id` directly.
    pub fn dependents_of(&self, id: PackageId) -> Vec<PackageId> {
        let Some(&idx) = self.index_of.get(&id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| self.graph[e.source()].id)
            .collect()
    }

    pub fn result_of(&self, id: PackageId) -> TestResult {
        self.results.get(&id).copied().unwrap_or(TestResult::Untested)
    }

    /// A vertex is ready to run once every dependency has passed. A
    /// dependency that failed, timed out, or was skipped never leads here —
    /// it drives this vertex to `Skipped` via [`DependencyGraph::set_result`]
    /// instead, so a ready vertex's dependencies are always `Passed`.
    pub fn is_ready(&self, id: PackageId) -> bool {
        self.dependencies_of(id)
            .iter()
            .all(|dep| self.result_of(*dep) == TestResult::Passed)
    }

    /// All untested vertices that are currently ready to run.
    pub fn ready_frontier(&self) -> Vec<PackageId> {
        self.vertices()
            .map(|p| p.id)
            .filter(|id| self.result_of(*id) == TestResult::Untested && self.is_ready(*id))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.results.values().all(TestResult::is_terminal)
    }

    /// Record `id`'s result. If it triggers a skip, every not-yet-terminal
    /// dependent is transitively marked `Skipped` in one pass — each vertex
    /// is visited at most once regardless of how many failed ancestors it
    /// has, so this is idempotent and safe to call again with an unrelated
    /// id afterwards. Returns the dependents newly driven to `Skipped` by
    /// this call (not including `id` itself), so a caller can log each one.
    pub fn set_result(&mut self, id: PackageId, result: TestResult) -> Vec<PackageId> {
        self.results.insert(id, result);
        if result.triggers_skip() { self.propagate_skip(id) } else { Vec::new() }
    }

    /// Overwrites every not-yet-`Skipped` ancestor of `id` to `Skipped`,
    /// including one already `Passed` — a failure discovered after the fact
    /// (as in a deny-listed or artificially-failed pre-passed vertex) still
    /// has to take its dependents down with it, not just `Untested` ones.
    fn propagate_skip(&mut self, id: PackageId) -> Vec<PackageId> {
        let mut queue: Vec<PackageId> = self.dependents_of(id);
        let mut seen: HashSet<PackageId> = HashSet::new();
        let mut newly_skipped = Vec::new();

        while let Some(dependent) = queue.pop() {
            if !seen.insert(dependent) {
                continue;
            }
            if self.result_of(dependent) != TestResult::Skipped {
                self.results.insert(dependent, TestResult::Skipped);
                newly_skipped.push(dependent);
                queue.extend(self.dependents_of(dependent));
            }
        }
        newly_skipped
    }

    /// Count of transitive dependents of `id`, used for failure-impact
    /// ranking. Counts each vertex once even under diamond sharing.
    pub fn transitive_dependent_count(&self, id: PackageId) -> usize {
        self.transitive_dependents(id).len()
    }

    /// Of `id`'s transitive dependents, how many ended up `Skipped` — the
    /// size of `id`'s own skip-propagation subtree, as distinct from
    /// dependents that separately failed for an unrelated reason.
    pub fn skipped_transitive_dependent_count(&self, id: PackageId) -> usize {
        self.transitive_dependents(id)
            .into_iter()
            .filter(|dependent| self.result_of(*dependent) == TestResult::Skipped)
            .count()
    }

    fn transitive_dependents(&self, id: PackageId) -> HashSet<PackageId> {
        let mut queue: Vec<PackageId> = self.dependents_of(id);
        let mut seen: HashSet<PackageId> = HashSet::new();
        while let Some(dependent) = queue.pop() {
            if seen.insert(dependent) {
                queue.extend(self.dependents_of(dependent));
            }
        }
        seen
    }
}
