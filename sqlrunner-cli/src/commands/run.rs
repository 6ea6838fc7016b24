use anyhow::Context;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use sqlrunner_core::review::{EXIT_NOTHING_RAN, EXIT_SUCCESS};
use sqlrunner_core::{
    review, BackendRegistry, ConsulClient, ConsulPlaybookProvider, ConsulSqlProvider,
    CredentialResolver, FileSqlProvider, HelperRegistry, LockFile, PlaybookProvider,
    PlaybookSource, ResolvedOptions, ResultTable, RunReport, Runner, RunnerConfig, SqlProvider,
    SqlSource, TargetStatus, TemplateEngine, YamlFilePlaybookProvider,
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::lock::lock_consul;
use super::OutputFormat;
use crate::EXIT_LOCKED;

/// Loads and runs the playbook, handling the lock around it. Returns the
/// process exit code.
pub async fn run_playbook(
    options: ResolvedOptions,
    config: &RunnerConfig,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<i32> {
    let mut lock = match &options.lock {
        Some(spec) => {
            let consul = lock_consul(spec, config)?;
            match LockFile::acquire(spec.path.clone(), spec.soft, consul).await {
                Ok(lock) => Some(lock),
                Err(e) => {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                    return Ok(EXIT_LOCKED);
                }
            }
        }
        None => None,
    };

    let helpers = HelperRegistry::with_defaults(CredentialResolver::new());
    let templates = Arc::new(TemplateEngine::new(Arc::new(helpers)));

    let playbook = playbook_provider(&options, config, Arc::clone(&templates))?
        .get_playbook()
        .await
        .context("Error getting playbook")?
        .merge_cli_variables(&options.variables);

    let sql = sql_provider(&options.sql, config)?;

    if let Some(lock) = lock.as_mut() {
        lock.lock().await.context("Error making lock")?;
    }

    let registry = Arc::new(BackendRegistry::with_defaults(config.connection.clone()));
    let runner = Runner::new(registry, sql, templates);

    let statuses = match runner.run(&playbook, &options.run).await {
        Ok(statuses) => statuses,
        Err(e) => {
            release_lock(lock.as_mut(), false).await;
            return Err(e.into());
        }
    };

    let (code, message) = review(&statuses);
    release_lock(lock.as_mut(), code == EXIT_SUCCESS || code == EXIT_NOTHING_RAN).await;

    if options.run.show_output && format == OutputFormat::Text {
        print_query_output(&statuses);
    }

    match format {
        OutputFormat::Json => {
            let report = RunReport::from_statuses(&statuses);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print_summary(code, &message, quiet),
    }

    Ok(code)
}

fn playbook_provider(
    options: &ResolvedOptions,
    config: &RunnerConfig,
    templates: Arc<TemplateEngine>,
) -> anyhow::Result<Box<dyn PlaybookProvider>> {
    let variables = options.variables.clone();
    Ok(match &options.playbook {
        PlaybookSource::File(path) => Box::new(YamlFilePlaybookProvider::new(
            path.clone(),
            variables,
            templates,
        )),
        PlaybookSource::Consul { address, key } => {
            let client = ConsulClient::with_timeout(address, config.consul.request_timeout())?;
            Box::new(ConsulPlaybookProvider::new(
                client,
                key.clone(),
                variables,
                templates,
            ))
        }
    })
}

fn sql_provider(source: &SqlSource, config: &RunnerConfig) -> anyhow::Result<Arc<dyn SqlProvider>> {
    Ok(match source {
        SqlSource::Directory(root) => {
            debug!(root = %root.display(), "Reading SQL from the file system");
            Arc::new(FileSqlProvider::new(root.clone()))
        }
        SqlSource::Consul { address, prefix } => {
            debug!(prefix = %prefix, "Reading SQL from consul");
            let client = ConsulClient::with_timeout(address, config.consul.request_timeout())?;
            Arc::new(ConsulSqlProvider::new(client, prefix.clone()))
        }
    })
}

/// Hard locks stay in place after a failed run; soft locks are always
/// released.
async fn release_lock(lock: Option<&mut LockFile>, run_succeeded: bool) {
    let Some(lock) = lock else {
        return;
    };
    if !lock.is_locked() || !(run_succeeded || lock.is_soft()) {
        return;
    }
    if let Err(e) = lock.unlock().await {
        warn!(path = %lock.path(), "Failed to release lock");
        e.log();
    }
}

fn print_summary(code: i32, message: &str, quiet: bool) {
    match code {
        EXIT_SUCCESS => {
            if !quiet {
                println!("{}", message.green());
            }
        }
        EXIT_NOTHING_RAN => eprintln!("{}", message.trim_end().yellow()),
        _ => eprintln!("{}", message.red()),
    }
}

fn print_query_output(statuses: &[TargetStatus]) {
    for status in statuses {
        for step in &status.steps {
            for query in &step.queries {
                let Some(output) = &query.output else {
                    continue;
                };
                println!();
                println!(
                    "{} {} {}",
                    query.query.name.cyan().bold(),
                    format!("(in step {} @ target {})", step.name, status.name).dimmed(),
                    query.path.dimmed()
                );
                println!("{}", render_table(output));
            }
        }
    }
}

fn render_table(output: &ResultTable) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            output
                .columns
                .iter()
                .map(|c| Cell::new(c).fg(Color::White))
                .collect::<Vec<_>>(),
        );

    for row in &output.rows {
        table.add_row(row.iter().map(|value| {
            if value == "NULL" {
                Cell::new(value).fg(Color::DarkGrey)
            } else {
                Cell::new(value)
            }
        }));
    }

    table
}
