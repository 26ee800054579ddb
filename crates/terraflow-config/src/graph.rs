//! Inter-project dependency graph.
//!
//! Built once per configuration load and immutable during a batch's
//! execution. A cycle is a configuration error caught at construction,
//! never a runtime condition.

use std::collections::{HashMap, HashSet};

use crate::{ConfigError, ConfigResult};

/// Directed acyclic graph over project names; an edge A → B means
/// "A depends on B".
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    deps: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from (project, dependencies) pairs.
    ///
    /// Fails with [`ConfigError::InvalidReference`] on an edge to an
    /// unknown project and [`ConfigError::CycleDetected`] on a cycle.
    pub fn build(projects: &[(String, Vec<String>)]) -> ConfigResult<Self> {
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        for (name, project_deps) in projects {
            if deps
                .insert(name.clone(), project_deps.clone())
                .is_some()
            {
                return Err(ConfigError::Duplicate(format!("project '{name}'")));
            }
        }

        for (name, project_deps) in &deps {
            for dep in project_deps {
                if !deps.contains_key(dep) {
                    return Err(ConfigError::InvalidReference(format!(
                        "project '{name}' depends on unknown project '{dep}'"
                    )));
                }
            }
        }

        let graph = Self { deps };
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn contains(&self, project: &str) -> bool {
        self.deps.contains_key(project)
    }

    /// Direct dependencies of a project. Empty for unknown projects.
    pub fn dependencies_of(&self, project: &str) -> &[String] {
        self.deps.get(project).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Projects from `within` that `project` depends on, directly or
    /// through any chain of edges. Intermediate nodes absent from
    /// `within` are traversed through, so ordering survives a batch that
    /// omits the middle of a chain.
    pub fn closure_within(&self, project: &str, within: &HashSet<String>) -> Vec<String> {
        let mut reachable = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<&str> = self
            .dependencies_of(project)
            .iter()
            .map(String::as_str)
            .collect();

        while let Some(node) = stack.pop() {
            if !visited.insert(node.to_string()) {
                continue;
            }
            if within.contains(node) && node != project {
                reachable.push(node.to_string());
            }
            stack.extend(self.dependencies_of(node).iter().map(String::as_str));
        }

        reachable
    }

    /// Detect cycles using DFS over every node.
    fn check_acyclic(&self) -> ConfigResult<()> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        let mut names: Vec<&String> = self.deps.keys().collect();
        names.sort();

        for name in names {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack) {
                    return Err(ConfigError::CycleDetected(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> Option<String> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());

        for dep in self.dependencies_of(node) {
            if !visited.contains(dep) {
                if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                return Some(format!("{node} -> {dep}"));
            }
        }

        rec_stack.remove(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> ConfigResult<DependencyGraph> {
        let projects: Vec<(String, Vec<String>)> = edges
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect();
        DependencyGraph::build(&projects)
    }

    #[test]
    fn builds_acyclic_graph() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]).unwrap();
        assert_eq!(g.dependencies_of("a"), &["b".to_string()]);
        assert!(g.dependencies_of("c").is_empty());
    }

    #[test]
    fn rejects_cycle() {
        let result = graph(&[("a", &["b"]), ("b", &["a"])]);
        assert!(matches!(result, Err(ConfigError::CycleDetected(_))));
    }

    #[test]
    fn rejects_self_cycle() {
        let result = graph(&[("a", &["a"])]);
        assert!(matches!(result, Err(ConfigError::CycleDetected(_))));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let result = graph(&[("a", &["ghost"])]);
        assert!(matches!(result, Err(ConfigError::InvalidReference(_))));
    }

    #[test]
    fn rejects_duplicate_project() {
        let result = graph(&[("a", &[]), ("a", &[])]);
        assert!(matches!(result, Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn closure_traverses_absent_middle_node() {
        // a -> b -> c, batch contains only a and c
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]).unwrap();
        let within: HashSet<String> = ["a".to_string(), "c".to_string()].into();
        assert_eq!(g.closure_within("a", &within), vec!["c".to_string()]);
    }
}
