//! Fan-out/fan-in execution of prepared steps across targets.
//!
//! One task per target; inside a target, steps run in order and the queries
//! of a step run concurrently. A step with any failed query ends that
//! target's run after the whole step has finished. Targets never affect each
//! other.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backends::{BackendRegistry, DynTargetClient};
use crate::error::RunnerResult;
use crate::models::{
    Playbook, QueryStatus, ReadyQuery, ReadyStep, StepStatus, Target, TargetError, TargetStatus,
};
use crate::prepare::load_steps;
use crate::selection::select_steps;
use crate::sql::SqlProvider;
use crate::template::TemplateEngine;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub from_step: Option<String>,
    pub run_query: Option<String>,
    pub dry_run: bool,
    pub show_output: bool,
    /// Print the prepared scripts instead of running them.
    pub fill_templates: bool,
}

/// Receives prepared scripts in template-preview mode.
pub trait PreviewSink: Send + Sync {
    fn emit(&self, step: &str, query: &ReadyQuery);
}

pub struct StdoutPreview;

impl PreviewSink for StdoutPreview {
    fn emit(&self, step: &str, query: &ReadyQuery) {
        println!(
            "Step name: {}\nQuery name: {}\nQuery path: {}\n{}",
            step, query.name, query.path, query.script
        );
    }
}

pub struct Runner {
    registry: Arc<BackendRegistry>,
    sql: Arc<dyn SqlProvider>,
    templates: Arc<TemplateEngine>,
    preview: Arc<dyn PreviewSink>,
}

impl Runner {
    pub fn new(
        registry: Arc<BackendRegistry>,
        sql: Arc<dyn SqlProvider>,
        templates: Arc<TemplateEngine>,
    ) -> Self {
        Self {
            registry,
            sql,
            templates,
            preview: Arc::new(StdoutPreview),
        }
    }

    pub fn with_preview_sink(mut self, sink: Arc<dyn PreviewSink>) -> Self {
        self.preview = sink;
        self
    }

    /// Selects, prepares and executes `playbook`.
    ///
    /// Selection problems come back as per-target statuses. Preparation
    /// problems are returned as `Err` since no target could run. Template
    /// preview returns an empty list.
    pub async fn run(
        &self,
        playbook: &Playbook,
        options: &RunOptions,
    ) -> RunnerResult<Vec<TargetStatus>> {
        let steps = match select_steps(
            &playbook.steps,
            &playbook.targets,
            options.from_step.as_deref(),
            options.run_query.as_deref(),
        ) {
            Ok(steps) => steps,
            Err(statuses) => return Ok(statuses),
        };

        let ready = load_steps(
            &steps,
            self.sql.as_ref(),
            &playbook.variables,
            &self.templates,
        )
        .await?;

        if options.fill_templates {
            for step in &ready {
                for query in &step.queries {
                    self.preview.emit(&step.name, query);
                }
            }
            return Ok(Vec::new());
        }

        Ok(self.execute(&playbook.targets, ready, options).await)
    }

    /// Runs already prepared steps against every target and waits for all of
    /// them. Results come back in target declaration order.
    pub async fn execute(
        &self,
        targets: &[Target],
        steps: Vec<ReadyStep>,
        options: &RunOptions,
    ) -> Vec<TargetStatus> {
        let steps = Arc::new(steps);
        let mut handles: Vec<(String, JoinHandle<TargetStatus>)> =
            Vec::with_capacity(targets.len());

        for target in targets {
            let registry = Arc::clone(&self.registry);
            let steps = Arc::clone(&steps);
            let target = target.clone();
            let dry_run = options.dry_run;
            let show_output = options.show_output;

            handles.push((
                target.name.clone(),
                tokio::spawn(async move {
                    run_target(&registry, target, &steps, dry_run, show_output).await
                }),
            ));
        }

        let mut statuses = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    error!(target_name = %name, error = %e, "Target task did not complete");
                    statuses.push(TargetStatus::with_error(
                        name,
                        TargetError::TaskAborted(e.to_string()),
                    ));
                }
            }
        }
        statuses
    }
}

async fn run_target(
    registry: &BackendRegistry,
    target: Target,
    steps: &[ReadyStep],
    dry_run: bool,
    show_output: bool,
) -> TargetStatus {
    let client = match registry.connect(&target, widest_step(steps)).await {
        Ok(client) => client,
        Err(e) => {
            warn!(target_name = %target.name, error = %e, "Target could not be initialised");
            return TargetStatus::with_error(target.name, e);
        }
    };

    let mut step_statuses = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
        let status = run_step(&client, &target.name, step, index + 1, dry_run, show_output).await;
        let failed = status.has_errors();
        step_statuses.push(status);

        if failed {
            debug!(target_name = %target.name, step = %step.name, "Step failed, skipping remaining steps");
            break;
        }
    }

    TargetStatus::new(target.name, step_statuses)
}

/// Largest number of queries any one step runs at the same time.
fn widest_step(steps: &[ReadyStep]) -> u32 {
    let widest = steps.iter().map(|s| s.queries.len()).max().unwrap_or(1);
    u32::try_from(widest).unwrap_or(u32::MAX).max(1)
}

async fn run_step(
    client: &DynTargetClient,
    target_name: &str,
    step: &ReadyStep,
    index: usize,
    dry_run: bool,
    show_output: bool,
) -> StepStatus {
    let mut handles: Vec<(Arc<ReadyQuery>, JoinHandle<QueryStatus>)> =
        Vec::with_capacity(step.queries.len());

    for query in &step.queries {
        debug!(
            "EXECUTING {} (in step {} @ {}): {}",
            query.name, step.name, target_name, query.path
        );

        let client = Arc::clone(client);
        let task_query = Arc::clone(query);
        handles.push((
            Arc::clone(query),
            tokio::spawn(async move { client.run_query(task_query, dry_run, show_output).await }),
        ));
    }

    let mut queries = Vec::with_capacity(handles.len());
    for (query, handle) in handles {
        let status = match handle.await {
            Ok(status) => status,
            Err(e) => QueryStatus::failure(query, format!("query task aborted: {}", e)),
        };
        log_query_status(target_name, &step.name, &status);
        queries.push(status);
    }

    StepStatus {
        name: step.name.clone(),
        index,
        queries,
    }
}

fn log_query_status(target_name: &str, step: &str, status: &QueryStatus) {
    match &status.error {
        Some(error) => warn!(
            "FAILURE: {} (step {} @ target {}), ERROR: {}",
            status.query.name, step, target_name, error
        ),
        None => info!(
            "SUCCESS: {} (step {} @ target {}), ROWS AFFECTED: {}",
            status.query.name, step, target_name, status.affected
        ),
    }
}
