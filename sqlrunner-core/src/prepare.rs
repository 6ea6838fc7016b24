//! Turns playbook queries into [`ReadyQuery`] values before anything runs.
//!
//! Any failure here is fatal for the whole run: a script that cannot be read
//! or expanded means the playbook itself is wrong, whichever target it would
//! have run on.

use std::sync::Arc;
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};
use crate::models::{ReadyQuery, ReadyStep, Step, Variables};
use crate::sql::SqlProvider;
use crate::template::TemplateEngine;

/// Fetches the script for `reference` and expands it when `template` is set.
pub async fn prepare_query(
    reference: &str,
    provider: &dyn SqlProvider,
    template: bool,
    variables: &Variables,
    engine: &TemplateEngine,
) -> RunnerResult<String> {
    let script = provider.get_sql(reference).await?;

    if !template {
        return Ok(script);
    }

    engine
        .render(&provider.resolve_key(reference), &script, variables)
        .await
}

/// Prepares every query of every step, in order, stopping at the first
/// failure.
pub async fn load_steps(
    steps: &[Step],
    provider: &dyn SqlProvider,
    variables: &Variables,
    engine: &TemplateEngine,
) -> RunnerResult<Vec<ReadyStep>> {
    let mut ready_steps = Vec::with_capacity(steps.len());

    for step in steps {
        let mut queries = Vec::with_capacity(step.queries.len());

        for query in &step.queries {
            let path = provider.resolve_key(&query.file);
            let script = prepare_query(&query.file, provider, query.template, variables, engine)
                .await
                .map_err(|e| match e {
                    RunnerError::SqlReadFailed { .. } => e,
                    other => RunnerError::SqlReadFailed {
                        path: path.clone(),
                        message: other.to_string(),
                    },
                })?;

            debug!(step = %step.name, query = %query.name, path = %path, "Prepared query");
            queries.push(Arc::new(ReadyQuery::new(script, query.name.clone(), path)));
        }

        ready_steps.push(ReadyStep {
            name: step.name.clone(),
            queries,
        });
    }

    Ok(ready_steps)
}
