//! Dependency-ordered scheduling of a job batch.

use std::collections::HashSet;

use terraflow_config::{ConfigError, ConfigResult, DependencyGraph};
use terraflow_core::job::Job;

/// A batch ordered for execution.
#[derive(Debug)]
pub struct Schedule {
    /// Jobs in total order: a job never precedes one it depends on.
    pub jobs: Vec<Job>,
    /// For each job, indices into `jobs` of the batch jobs it depends on
    /// (directly or through projects absent from the batch).
    pub deps: Vec<Vec<usize>>,
    /// Job indices grouped by dependency level. Jobs within a level have
    /// no relative ordering constraint and may run concurrently; a level
    /// only starts once the previous level is fully terminal.
    pub levels: Vec<Vec<usize>>,
}

/// Order `jobs` so that every job runs after the batch jobs it depends
/// on. Ties preserve input order, keeping output reproducible. A residual
/// cycle is a configuration error, not a condition to execute around.
pub fn schedule(jobs: Vec<Job>, graph: &DependencyGraph) -> ConfigResult<Schedule> {
    let batch_names: HashSet<String> = jobs.iter().map(|j| j.project_name.clone()).collect();

    // Effective dependencies: batch members reachable through the graph,
    // traversing projects the batch omits.
    let effective_deps: Vec<Vec<String>> = jobs
        .iter()
        .map(|job| graph.closure_within(&job.project_name, &batch_names))
        .collect();

    // Kahn's algorithm; each round takes the first unemitted job (input
    // order) whose dependencies are all emitted.
    let mut emitted: Vec<usize> = Vec::with_capacity(jobs.len());
    let mut done: Vec<bool> = vec![false; jobs.len()];
    let mut done_names: HashSet<String> = HashSet::new();

    while emitted.len() < jobs.len() {
        let next = jobs.iter().enumerate().position(|(i, _)| {
            !done[i] && effective_deps[i].iter().all(|d| done_names.contains(d))
        });

        match next {
            Some(i) => {
                done[i] = true;
                done_names.insert(jobs[i].project_name.clone());
                emitted.push(i);
            }
            None => {
                let stuck: Vec<&str> = jobs
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !done[*i])
                    .map(|(_, j)| j.project_name.as_str())
                    .collect();
                return Err(ConfigError::CycleDetected(stuck.join(", ")));
            }
        }
    }

    // Reindex into the emitted order.
    let ordered_jobs: Vec<Job> = {
        let mut slots: Vec<Option<Job>> = jobs.into_iter().map(Some).collect();
        emitted
            .iter()
            .map(|&old_idx| slots[old_idx].take().expect("each job emitted once"))
            .collect()
    };

    let deps: Vec<Vec<usize>> = emitted
        .iter()
        .map(|&old_idx| {
            let mut indices: Vec<usize> = effective_deps[old_idx]
                .iter()
                .map(|name| {
                    ordered_jobs
                        .iter()
                        .position(|j| &j.project_name == name)
                        .expect("dependency is a batch member")
                })
                .collect();
            indices.sort_unstable();
            indices
        })
        .collect();

    // Coarse leveling from the total order: level = 1 + max(dep levels).
    let mut level_of = vec![0usize; ordered_jobs.len()];
    for idx in 0..ordered_jobs.len() {
        level_of[idx] = deps[idx]
            .iter()
            .map(|&d| level_of[d] + 1)
            .max()
            .unwrap_or(0);
    }

    let level_count = level_of.iter().max().map_or(0, |&m| m + 1);
    let mut levels: Vec<Vec<usize>> = vec![Vec::new(); level_count];
    for (idx, &level) in level_of.iter().enumerate() {
        levels[level].push(idx);
    }

    Ok(Schedule {
        jobs: ordered_jobs,
        deps,
        levels,
    })
}
