//! Turns the per-target results of a run into an exit code and a summary.

use serde::Serialize;
use std::fmt::Write;

use crate::models::TargetStatus;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_INIT_ERRORS: i32 = 5;
pub const EXIT_QUERY_ERRORS: i32 = 6;
pub const EXIT_INIT_AND_QUERY_ERRORS: i32 = 7;
pub const EXIT_NOTHING_RAN: i32 = 8;

/// Exit code policy. Pure so callers can reason about it in isolation.
pub fn exit_code(init_errors: bool, query_errors: bool, query_count: usize) -> i32 {
    match (init_errors, query_errors) {
        (true, true) => EXIT_INIT_AND_QUERY_ERRORS,
        (true, false) => EXIT_INIT_ERRORS,
        (false, true) => EXIT_QUERY_ERRORS,
        (false, false) if query_count == 0 => EXIT_NOTHING_RAN,
        (false, false) => EXIT_SUCCESS,
    }
}

/// Scans the statuses and returns `(exit_code, query_count)`.
///
/// The count covers successful queries, but a query error resets it and
/// stops counting for that target.
pub fn exit_code_and_query_count(statuses: &[TargetStatus]) -> (i32, usize) {
    let mut init_errors = false;
    let mut query_errors = false;
    let mut query_count = 0usize;

    for status in statuses {
        if status.has_init_errors() {
            init_errors = true;
        }

        'queries: for step in &status.steps {
            for query in &step.queries {
                if query.is_error() {
                    query_errors = true;
                    query_count = 0;
                    break 'queries;
                }
                query_count += 1;
            }
        }
    }

    (exit_code(init_errors, query_errors, query_count), query_count)
}

/// Returns the exit code and the message to print for it.
pub fn review(statuses: &[TargetStatus]) -> (i32, String) {
    let (code, query_count) = exit_code_and_query_count(statuses);

    let message = match code {
        EXIT_SUCCESS => success_message(query_count, statuses.len()),
        EXIT_NOTHING_RAN => "WARNING: No queries to run\n".to_string(),
        _ => failure_message(statuses),
    };

    (code, message)
}

pub fn success_message(query_count: usize, target_count: usize) -> String {
    format!(
        "SUCCESS: {} queries executed against {} targets",
        query_count, target_count
    )
}

/// Lists target initialisation errors, then every failed query with where it
/// ran. Successful queries are left out.
pub fn failure_message(statuses: &[TargetStatus]) -> String {
    let mut message = String::from("\nTARGET INITIALIZATION FAILURES:");

    for status in statuses.iter().filter(|s| s.has_init_errors()) {
        let _ = write!(message, "\n* {}", status.name);
        for error in &status.errors {
            let _ = write!(message, ", ERRORS:\n  - {}", error);
        }
    }

    message.push_str("\nQUERY FAILURES:");
    for status in statuses {
        for (step, query) in status.failed_queries() {
            let _ = write!(
                message,
                "\n* Query {} {} (in step {} @ target {}), ERROR:\n  - {}",
                query.query.name,
                query.path,
                step.name,
                status.name,
                query.error.as_deref().unwrap_or_default()
            );
        }
    }

    message.push('\n');
    message
}

/// Machine-readable form of a run, for `--format json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub exit_code: i32,
    pub query_count: usize,
    pub target_count: usize,
    pub targets: Vec<TargetReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub name: String,
    pub errors: Vec<String>,
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub index: usize,
    pub queries: Vec<QueryReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub name: String,
    pub path: String,
    pub affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn from_statuses(statuses: &[TargetStatus]) -> Self {
        let (exit_code, query_count) = exit_code_and_query_count(statuses);

        let targets = statuses
            .iter()
            .map(|status| TargetReport {
                name: status.name.clone(),
                errors: status.errors.iter().map(ToString::to_string).collect(),
                steps: status
                    .steps
                    .iter()
                    .map(|step| StepReport {
                        name: step.name.clone(),
                        index: step.index,
                        queries: step
                            .queries
                            .iter()
                            .map(|q| QueryReport {
                                name: q.query.name.clone(),
                                path: q.path.clone(),
                                affected: q.affected,
                                error: q.error.clone(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            exit_code,
            query_count,
            target_count: statuses.len(),
            targets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryStatus, ReadyQuery, StepStatus, TargetError};
    use std::sync::Arc;

    fn ok(name: &str) -> QueryStatus {
        QueryStatus::success(
            Arc::new(ReadyQuery::new("", name, format!("/sql/{}.sql", name))),
            1,
        )
    }

    fn failed(name: &str, error: &str) -> QueryStatus {
        QueryStatus::failure(
            Arc::new(ReadyQuery::new("", name, format!("/sql/{}.sql", name))),
            error,
        )
    }

    fn target(name: &str, queries: Vec<QueryStatus>) -> TargetStatus {
        TargetStatus::new(
            name,
            vec![StepStatus {
                name: "step1".to_string(),
                index: 1,
                queries,
            }],
        )
    }

    #[test]
    fn test_exit_code_table() {
        assert_eq!(exit_code(true, true, 3), 7);
        assert_eq!(exit_code(true, false, 3), 5);
        assert_eq!(exit_code(false, true, 3), 6);
        assert_eq!(exit_code(false, false, 0), 8);
        assert_eq!(exit_code(false, false, 1), 0);
    }

    #[test]
    fn test_empty_run_is_nothing_ran() {
        let (code, message) = review(&[]);
        assert_eq!(code, EXIT_NOTHING_RAN);
        assert_eq!(message, "WARNING: No queries to run\n");
    }

    #[test]
    fn test_success_counts_queries_and_targets() {
        let statuses = vec![target("a", vec![ok("q1"), ok("q2")]), target("b", vec![ok("q1")])];
        let (code, message) = review(&statuses);
        assert_eq!(code, 0);
        assert_eq!(message, "SUCCESS: 3 queries executed against 2 targets");
    }

    #[test]
    fn test_query_error_is_not_masked_by_other_target() {
        let statuses = vec![
            target("a", vec![failed("q1", "boom")]),
            target("b", vec![ok("q1"), ok("q2")]),
        ];
        let (code, query_count) = exit_code_and_query_count(&statuses);
        assert_eq!(code, EXIT_QUERY_ERRORS);
        // reset on the failure, then the healthy target counts again
        assert_eq!(query_count, 2);
    }

    #[test]
    fn test_failure_message_layout() {
        let statuses = vec![
            TargetStatus::with_error(
                "broken",
                TargetError::UnsupportedBackend("oracle".to_string()),
            ),
            target("db", vec![ok("fine"), failed("bad", "syntax error at or near \"SELEC\"")]),
        ];

        let (code, message) = review(&statuses);
        assert_eq!(code, EXIT_INIT_AND_QUERY_ERRORS);
        assert_eq!(
            message,
            "\nTARGET INITIALIZATION FAILURES:\
             \n* broken, ERRORS:\n  - Database type is unsupported: oracle\
             \nQUERY FAILURES:\
             \n* Query bad /sql/bad.sql (in step step1 @ target db), ERROR:\n  - syntax error at or near \"SELEC\"\n"
        );
    }

    #[test]
    fn test_selection_errors_exit_as_init_errors() {
        let statuses = vec![
            TargetStatus::with_error("a", TargetError::StepNotFound("x".to_string())),
            TargetStatus::with_error("b", TargetError::StepNotFound("x".to_string())),
        ];
        assert_eq!(review(&statuses).0, EXIT_INIT_ERRORS);
    }

    #[test]
    fn test_run_report_serializes() {
        let statuses = vec![target("a", vec![ok("q1"), failed("q2", "nope")])];
        let report = RunReport::from_statuses(&statuses);
        assert_eq!(report.exit_code, EXIT_QUERY_ERRORS);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["target_count"], 1);
        assert_eq!(json["targets"][0]["steps"][0]["queries"][1]["error"], "nope");
        assert!(json["targets"][0]["steps"][0]["queries"][0].get("error").is_none());
    }
}
