//! Narrowing the step list before execution.
//!
//! Selection failures are not `RunnerError`s: they come back as one
//! [`TargetStatus`] per declared target, each carrying the same
//! [`TargetError`], so they flow through review like any other target
//! failure.

use crate::models::{Step, Target, TargetError, TargetStatus};

pub const RUN_QUERY_SEPARATOR: &str = "::";

pub type SelectionResult = Result<Vec<Step>, Vec<TargetStatus>>;

/// Applies `--run-query` when given, otherwise `--from-step`.
pub fn select_steps(
    steps: &[Step],
    targets: &[Target],
    from_step: Option<&str>,
    run_query: Option<&str>,
) -> SelectionResult {
    match run_query {
        Some(run_query) => trim_to_query(steps, run_query, targets),
        None => trim_steps(steps, from_step, targets),
    }
}

/// Keeps the named step and everything after it. The first step with a
/// matching name wins.
pub fn trim_steps(steps: &[Step], from_step: Option<&str>, targets: &[Target]) -> SelectionResult {
    let Some(from_step) = from_step.filter(|s| !s.is_empty()) else {
        return Ok(steps.to_vec());
    };

    match steps.iter().position(|s| s.name == from_step) {
        Some(index) => Ok(steps[index..].to_vec()),
        None => Err(replicate(
            targets,
            TargetError::StepNotFound(from_step.to_string()),
        )),
    }
}

/// Reduces the playbook to the single query addressed by `step::query`.
pub fn trim_to_query(steps: &[Step], run_query: &str, targets: &[Target]) -> SelectionResult {
    let Some((step_name, query_name)) = parse_run_query(run_query) else {
        return Err(replicate(
            targets,
            TargetError::RunQueryArgument(run_query.to_string()),
        ));
    };

    let trimmed = trim_steps(steps, Some(step_name), targets)?;
    let mut step = trimmed[0].clone();

    match step.queries.iter().find(|q| q.name == query_name) {
        Some(query) => {
            step.queries = vec![query.clone()];
            Ok(vec![step])
        }
        None => Err(replicate(
            targets,
            TargetError::QueryNotFound(run_query.to_string()),
        )),
    }
}

/// Splits `step::query`; both parts must be non-empty and the separator must
/// appear exactly once.
pub fn parse_run_query(run_query: &str) -> Option<(&str, &str)> {
    let (step, query) = run_query.split_once(RUN_QUERY_SEPARATOR)?;
    if step.is_empty() || query.is_empty() || query.contains(RUN_QUERY_SEPARATOR) {
        return None;
    }
    Some((step, query))
}

pub(crate) fn replicate(targets: &[Target], error: TargetError) -> Vec<TargetStatus> {
    targets
        .iter()
        .map(|t| TargetStatus::with_error(t.name.clone(), error.clone()))
        .collect()
}
