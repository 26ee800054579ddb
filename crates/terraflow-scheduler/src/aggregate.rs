//! Folding job results into the batch-level auto-merge signals.

use terraflow_core::job::{BatchResult, JobResult};

/// Fold the ordered job results into a [`BatchResult`].
///
/// `covers_all_impacted_projects` is supplied by the caller: whether the
/// batch included every impacted project depends on how it was selected,
/// which the aggregator cannot know from job identities alone.
pub fn aggregate_results(results: &[JobResult], covers_all_impacted_projects: bool) -> BatchResult {
    let mut all_applies_success = true;
    let mut at_least_one_apply = false;

    for result in results {
        if result.apply_attempted {
            at_least_one_apply = true;
            if !result.apply_succeeded {
                all_applies_success = false;
            }
        }
    }

    BatchResult {
        all_applies_success,
        at_least_one_apply,
        covers_all_impacted_projects,
    }
}
