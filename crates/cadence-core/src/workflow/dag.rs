//! Routine dependency graph: validation and stage computation.
//!
//! Uses `petgraph` with one node per declared routine and an edge from each
//! dependency to its dependent. Routines are processed in declaration order;
//! each `dependsOn` entry must name a declared routine and must not already
//! be reachable from the routine being processed. Stages follow from a
//! topological walk: roots are stage 1, every other routine is one more than
//! its deepest dependency.

use cadence_types::definition::RoutineDefinition;
use indexmap::IndexMap;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use super::definition::WorkflowError;

/// Dependency metadata for every declared routine, indexed by declaration
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// 1-based stage per routine.
    pub stages: Vec<usize>,
    /// Deduplicated dependency indices per routine.
    pub dependencies: Vec<Vec<usize>>,
    /// Deduplicated dependent indices per routine (reverse edges).
    pub dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn build(routines: &IndexMap<String, RoutineDefinition>) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::<&str, ()>::new();
        let nodes: Vec<NodeIndex> = routines.keys().map(|n| graph.add_node(n.as_str())).collect();

        let mut dependencies = vec![Vec::new(); routines.len()];
        let mut dependents = vec![Vec::new(); routines.len()];

        for (index, (name, routine)) in routines.iter().enumerate() {
            for dep in &routine.depends_on {
                let dep_index = routines.get_index_of(dep.as_str()).ok_or_else(|| {
                    WorkflowError::UnknownDependency(format!(
                        "Routine \"{name}\" depends on \"{dep}\" which does not exist."
                    ))
                })?;
                if dependencies[index].contains(&dep_index) {
                    continue;
                }

                // An edge dep -> routine closes a cycle iff routine already
                // reaches dep.
                if dep_index == index
                    || has_path_connecting(&graph, nodes[index], nodes[dep_index], None)
                {
                    return Err(WorkflowError::CycleDetected(format!(
                        "Circular dependency detected: routine \"{name}\" depends on \"{dep}\", \
                         which already depends on \"{name}\""
                    )));
                }

                graph.add_edge(nodes[dep_index], nodes[index], ());
                dependencies[index].push(dep_index);
                dependents[dep_index].push(index);
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| {
            WorkflowError::CycleDetected(format!(
                "Circular dependency detected involving routine \"{}\"",
                graph[cycle.node_id()]
            ))
        })?;

        let mut stages = vec![1; routines.len()];
        for node in sorted {
            let index = node.index();
            stages[index] = dependencies[index]
                .iter()
                .map(|&dep| stages[dep] + 1)
                .max()
                .unwrap_or(1);
        }

        Ok(Self {
            stages,
            dependencies,
            dependents,
        })
    }

    /// Highest stage number (0 when there are no routines).
    pub fn stage_count(&self) -> usize {
        self.stages.iter().copied().max().unwrap_or(0)
    }

    /// Every routine reachable through dependents, excluding `index`.
    pub fn transitive_dependents(&self, index: usize) -> Vec<usize> {
        let mut seen = vec![false; self.stages.len()];
        let mut stack = vec![index];
        let mut out = Vec::new();
        while let Some(current) = stack.pop() {
            for &dependent in &self.dependents[current] {
                if !seen[dependent] {
                    seen[dependent] = true;
                    out.push(dependent);
                    stack.push(dependent);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routines(spec: &[(&str, &[&str])]) -> IndexMap<String, RoutineDefinition> {
        spec.iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    RoutineDefinition {
                        depends_on: deps.iter().map(|d| d.to_string()).collect(),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn stages_follow_deepest_dependency() {
        let graph = DependencyGraph::build(&routines(&[
            ("deploy", &["test", "lint"]),
            ("build", &[]),
            ("lint", &[]),
            ("test", &["build"]),
        ]))
        .unwrap();
        assert_eq!(graph.stages, vec![3, 1, 1, 2]);
        assert_eq!(graph.stage_count(), 3);
        assert_eq!(graph.dependents[1], vec![3]);
        assert_eq!(graph.dependencies[0], vec![3, 2]);
    }

    #[test]
    fn every_stage_is_one_more_than_its_deepest_dependency() {
        let graph = DependencyGraph::build(&routines(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a", "b"]),
            ("d", &["c"]),
            ("e", &["a", "d"]),
            ("f", &[]),
        ]))
        .unwrap();
        for (index, deps) in graph.dependencies.iter().enumerate() {
            let expected = deps.iter().map(|&d| graph.stages[d] + 1).max().unwrap_or(1);
            assert_eq!(graph.stages[index], expected);
        }
        assert_eq!(graph.stages, vec![1, 2, 3, 4, 5, 1]);
    }

    #[test]
    fn duplicate_edges_are_collapsed() {
        let graph = DependencyGraph::build(&routines(&[("a", &[]), ("b", &["a", "a"])])).unwrap();
        assert_eq!(graph.dependencies[1], vec![0]);
        assert_eq!(graph.dependents[0], vec![1]);
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let err = DependencyGraph::build(&routines(&[("a", &["ghost"])])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Routine \"a\" depends on \"ghost\" which does not exist."
        );
    }

    #[test]
    fn two_routine_cycle_names_both() {
        let err = DependencyGraph::build(&routines(&[("a", &["b"]), ("b", &["a"])])).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
        let message = err.to_string();
        assert!(message.contains("\"a\""));
        assert!(message.contains("\"b\""));
    }

    #[test]
    fn self_dependency_and_long_cycles_are_rejected() {
        assert!(DependencyGraph::build(&routines(&[("a", &["a"])])).is_err());
        assert!(
            DependencyGraph::build(&routines(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]))
                .is_err()
        );
    }

    #[test]
    fn transitive_dependents_walk_the_whole_subtree() {
        let graph = DependencyGraph::build(&routines(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("d", &[]),
        ]))
        .unwrap();
        let mut dependents = graph.transitive_dependents(0);
        dependents.sort_unstable();
        assert_eq!(dependents, vec![1, 2]);
        assert!(graph.transitive_dependents(3).is_empty());
    }
}
