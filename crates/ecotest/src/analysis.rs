//! Result analysis: ranking finished runs by how much of the ecosystem a
//! failure took down with it.

use crate::graph::DependencyGraph;
use crate::types::{FailureImpact, TestResult, TestResultKind};

/// Every non-`Passed`, non-`Untested` vertex, ranked by transitive dependent
/// count (most impactful first). A well-formed completed run has no
/// `Untested` vertices left, so this only ever reports `Failed`, `TimedOut`,
/// and `Skipped` — ties break by package name for a stable order.
pub fn rank_failures(graph: &DependencyGraph) -> Vec<FailureImpact> {
    let mut impacts: Vec<FailureImpact> = graph
        .vertices()
        .filter_map(|package| {
            let result = graph.result_of(package.id);
            if matches!(result, TestResult::Passed | TestResult::Untested) {
                return None;
            }
            let kind = TestResultKind::try_from(result).ok()?;
            Some(FailureImpact {
                package_id: package.id,
                package_name: package.name.clone(),
                result: kind,
                transitive_dependents: graph.transitive_dependent_count(package.id),
                skipped_dependents: graph.skipped_transitive_dependent_count(package.id),
            })
        })
        .collect();

    impacts.sort_by(|a, b| {
        b.transitive_dependents
            .cmp(&a.transitive_dependents)
            .then_with(|| a.package_name.cmp(&b.package_name))
    });
    impacts
}

/// The subset of [`rank_failures`] whose result is `Failed` or `TimedOut`
/// directly (the root causes), excluding packages that only failed because
/// a dependency did.
pub fn root_causes(graph: &DependencyGraph) -> Vec<FailureImpact> {
    rank_failures(graph)
        .into_iter()
        .filter(|impact| matches!(impact.result, TestResultKind::Failed | TestResultKind::TimedOut))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{Package, Registry};
    use std::path::PathBuf;
    use uuid::Uuid;

    fn leaf(name: &str) -> Package {
        Package {
            name: name.to_string(),
            id: Uuid::new_v4(),
            metadata_path: PathBuf::from(name),
            version: Some(semver::Version::new(1, 0, 0)),
            registry_name: Some("test".to_string()),
        }
    }

    #[test]
    fn root_cause_ranks_above_its_skipped_dependents_via_stdlib_chain() {
        let registry = Registry { name: "t".to_string(), id: Uuid::new_v4(), path: PathBuf::from("."), packages: vec![] };
        let mut graph = DependencyGraph::build(&registry).unwrap();
        let core = graph.vertices().find(|p| p.name == "core").unwrap().id;
        graph.set_result(core, TestResult::Failed);

        let ranked = rank_failures(&graph);
        assert_eq!(ranked[0].package_name, "core");
        assert_eq!(ranked[0].transitive_dependents, 3);

        let roots = root_causes(&graph);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].package_name, "core");
    }

    #[test]
    fn passed_and_untested_are_excluded() {
        let registry = Registry {
            name: "t".to_string(),
            id: Uuid::new_v4(),
            path: PathBuf::from("."),
            packages: vec![leaf("untouched")],
        };
        let graph = DependencyGraph::build(&registry).unwrap();
        // Nothing has run yet; every vertex is Untested.
        assert!(rank_failures(&graph).is_empty());
    }
}
