use clap::{CommandFactory, Parser};
use colored::Colorize;
use sqlrunner_core::options::SQLROOT_PLAYBOOK;
use sqlrunner_core::{resolve_options, LoggingConfig, RawOptions, RunnerConfig, RunnerError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::{handle_lock_operation, run_playbook, OutputFormat};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_LOCKED: i32 = 3;

#[derive(Parser)]
#[command(name = "sql-runner")]
#[command(version = VERSION)]
#[command(about = "Run playbooks of SQL scripts in series and parallel on Redshift, Postgres and MySQL")]
#[command(long_about = r#"
sql-runner executes a playbook of SQL scripts against one or more targets.
Steps run one after another; the queries inside a step run in parallel.
A failing step stops that target, other targets carry on.

Exit codes: 0 success, 1 error, 2 bad arguments, 3 lock present,
5 target initialisation errors, 6 query errors, 7 both, 8 nothing ran.
"#)]
struct Cli {
    #[arg(long, help = "Playbook of SQL scripts to execute")]
    playbook: Option<String>,

    #[arg(
        long,
        default_value = SQLROOT_PLAYBOOK,
        help = "Absolute path to SQL scripts. Use PLAYBOOK, BINARY and PLAYBOOK_CHILD for those respective paths"
    )]
    sqlroot: String,

    #[arg(
        long = "var",
        value_name = "KEY=VALUE",
        help = "Variables to be passed to the playbook, in the key=value format (comma-separated or repeated)"
    )]
    variables: Vec<String>,

    #[arg(long, alias = "fromStep", help = "Starts from a given step defined in your playbook")]
    from_step: Option<String>,

    #[arg(
        long,
        alias = "runQuery",
        value_name = "STEP::QUERY",
        help = "Will run a single query in the playbook"
    )]
    run_query: Option<String>,

    #[arg(long, alias = "dryRun", help = "Runs through a playbook without executing any of the SQL")]
    dry_run: bool,

    #[arg(long, alias = "showQueryOutput", help = "Prints the rows returned by queries")]
    show_output: bool,

    #[arg(long, alias = "fillTemplates", help = "Prints the SQL of every query with templates filled, without running it")]
    fill_templates: bool,

    #[arg(long, help = "The address of a consul server with playbooks and SQL files stored in KV pairs")]
    consul: Option<String>,

    #[arg(long, alias = "consulOnlyForLock", help = "Read playbook and SQL locally, use consul only for the lock")]
    consul_only_for_lock: bool,

    #[arg(long, help = "Checks and sets a lockfile to ensure this run is a singleton. Deletes lock on run completing successfully")]
    lock: Option<String>,

    #[arg(long, alias = "softLock", help = "Like --lock but the lockfile will be deleted even if the run fails")]
    soft_lock: Option<String>,

    #[arg(long, alias = "checkLock", help = "Checks whether the lockfile already exists")]
    check_lock: Option<String>,

    #[arg(long, alias = "deleteLock", help = "Will attempt to delete a lockfile if it exists")]
    delete_lock: Option<String>,

    #[arg(long, help = "Path to a sql-runner.toml configuration file")]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "text", help = "Summary format (text, json)")]
    format: String,

    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn raw_options(&self) -> RawOptions {
        RawOptions {
            playbook: self.playbook.clone(),
            sqlroot: self.sqlroot.clone(),
            variables: self.variables.clone(),
            from_step: self.from_step.clone(),
            run_query: self.run_query.clone(),
            dry_run: self.dry_run,
            show_output: self.show_output,
            fill_templates: self.fill_templates,
            consul: self.consul.clone(),
            consul_only_for_lock: self.consul_only_for_lock,
            lock: self.lock.clone(),
            soft_lock: self.soft_lock.clone(),
            check_lock: self.check_lock.clone(),
            delete_lock: self.delete_lock.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if std::env::args_os().len() <= 1 {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return exit_code(if e.is_config_error() {
                EXIT_USAGE
            } else {
                EXIT_FAILURE
            });
        }
    };

    init_logging(&config.logging, cli.verbose, cli.quiet);

    match run(cli, config).await {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            let runner_error = e.downcast_ref::<RunnerError>();
            if let Some(hint) = runner_error.and_then(RunnerError::user_suggestion) {
                eprintln!("  {} {}", "Hint:".yellow(), hint);
            }
            match runner_error {
                Some(err) if err.is_config_error() => exit_code(EXIT_USAGE),
                _ => exit_code(EXIT_FAILURE),
            }
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn load_config(path: Option<&Path>) -> sqlrunner_core::RunnerResult<RunnerConfig> {
    match path {
        Some(path) => RunnerConfig::load_with_file(path),
        None => RunnerConfig::load(),
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        config.level.as_str()
    };

    // sqlx logs every statement at info
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", level)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli, config: RunnerConfig) -> anyhow::Result<i32> {
    let raw = cli.raw_options();
    let format = OutputFormat::parse(&cli.format);

    if let Some(operation) = raw.lock_operation() {
        return handle_lock_operation(operation, &config).await;
    }

    if raw.playbook.as_deref().unwrap_or_default().is_empty() {
        println!("required flag not defined: -playbook");
        return Ok(EXIT_USAGE);
    }

    let options = match resolve_options(&raw) {
        Ok(options) => options,
        Err(e) => {
            println!("Error resolving -sqlroot: {}\n{}", raw.sqlroot, e);
            return Ok(EXIT_USAGE);
        }
    };

    run_playbook(options, &config, format, cli.quiet).await
}
