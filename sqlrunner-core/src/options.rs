//! Resolution of raw command-line values into the settings a run uses.
//!
//! `resolve_options` is a pure transformation: it never touches shared
//! state, it just returns a new [`ResolvedOptions`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::engine::RunOptions;
use crate::error::{RunnerError, RunnerResult};

pub const SQLROOT_BINARY: &str = "BINARY";
pub const SQLROOT_PLAYBOOK: &str = "PLAYBOOK";
pub const SQLROOT_PLAYBOOK_CHILD: &str = "PLAYBOOK_CHILD";

/// Flag values exactly as the user gave them.
#[derive(Debug, Clone)]
pub struct RawOptions {
    pub playbook: Option<String>,
    pub sqlroot: String,
    pub variables: Vec<String>,
    pub from_step: Option<String>,
    pub run_query: Option<String>,
    pub dry_run: bool,
    pub show_output: bool,
    pub fill_templates: bool,
    pub consul: Option<String>,
    pub consul_only_for_lock: bool,
    pub lock: Option<String>,
    pub soft_lock: Option<String>,
    pub check_lock: Option<String>,
    pub delete_lock: Option<String>,
}

impl Default for RawOptions {
    fn default() -> Self {
        Self {
            playbook: None,
            sqlroot: SQLROOT_PLAYBOOK.to_string(),
            variables: Vec::new(),
            from_step: None,
            run_query: None,
            dry_run: false,
            show_output: false,
            fill_templates: false,
            consul: None,
            consul_only_for_lock: false,
            lock: None,
            soft_lock: None,
            check_lock: None,
            delete_lock: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybookSource {
    File(PathBuf),
    Consul { address: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlSource {
    Directory(PathBuf),
    Consul { address: String, prefix: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSpec {
    pub path: String,
    pub soft: bool,
    /// Consul address when the lock is a KV entry.
    pub consul: Option<String>,
}

/// Lock maintenance that runs instead of a playbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOperation {
    Check(LockSpec),
    Delete(LockSpec),
}

#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub playbook: PlaybookSource,
    pub sql: SqlSource,
    pub variables: HashMap<String, String>,
    pub run: RunOptions,
    /// `None` when no lock was requested or on a dry run.
    pub lock: Option<LockSpec>,
}

impl RawOptions {
    fn consul_address(&self) -> Option<&str> {
        self.consul.as_deref().filter(|c| !c.is_empty())
    }

    /// `--check-lock` / `--delete-lock`, when given.
    pub fn lock_operation(&self) -> Option<LockOperation> {
        let spec = |path: &String| LockSpec {
            path: path.clone(),
            soft: false,
            consul: self.consul_address().map(str::to_string),
        };

        if let Some(path) = self.check_lock.as_ref().filter(|p| !p.is_empty()) {
            return Some(LockOperation::Check(spec(path)));
        }
        self.delete_lock
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|path| LockOperation::Delete(spec(path)))
    }

    fn lock_spec(&self) -> Option<LockSpec> {
        if self.dry_run {
            return None;
        }

        let (path, soft) = match (&self.lock, &self.soft_lock) {
            (Some(path), _) if !path.is_empty() => (path.clone(), false),
            (_, Some(path)) if !path.is_empty() => (path.clone(), true),
            _ => return None,
        };

        Some(LockSpec {
            path,
            soft,
            consul: self.consul_address().map(str::to_string),
        })
    }
}

pub fn resolve_options(raw: &RawOptions) -> RunnerResult<ResolvedOptions> {
    let playbook = raw
        .playbook
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            RunnerError::InvalidOptions("required flag not defined: -playbook".to_string())
        })?;

    let sqlroot = resolve_sql_root(
        &raw.sqlroot,
        playbook,
        raw.consul_address(),
        raw.consul_only_for_lock,
    )?;

    let remote = raw.consul_address().filter(|_| !raw.consul_only_for_lock);

    let (playbook_source, sql_source) = match remote {
        Some(address) => (
            PlaybookSource::Consul {
                address: address.to_string(),
                key: playbook.to_string(),
            },
            SqlSource::Consul {
                address: address.to_string(),
                prefix: sqlroot,
            },
        ),
        None => (
            PlaybookSource::File(PathBuf::from(playbook)),
            SqlSource::Directory(PathBuf::from(sqlroot)),
        ),
    };

    Ok(ResolvedOptions {
        playbook: playbook_source,
        sql: sql_source,
        variables: parse_cli_variables(&raw.variables),
        run: RunOptions {
            from_step: raw.from_step.clone().filter(|s| !s.is_empty()),
            run_query: raw.run_query.clone().filter(|s| !s.is_empty()),
            dry_run: raw.dry_run,
            show_output: raw.show_output,
            fill_templates: raw.fill_templates,
        },
        lock: raw.lock_spec(),
    })
}

/// Turns the `--sqlroot` value into a directory or Consul prefix.
pub fn resolve_sql_root(
    sqlroot: &str,
    playbook: &str,
    consul: Option<&str>,
    consul_only_for_lock: bool,
) -> RunnerResult<String> {
    let with_consul = || {
        RunnerError::InvalidOptions(format!("Cannot use {} option with -consul argument", sqlroot))
    };
    let without_consul = || {
        RunnerError::InvalidOptions(format!(
            "Cannot use {} option without -consul argument",
            sqlroot
        ))
    };
    let with_consul_only_for_lock = || {
        RunnerError::InvalidOptions(format!(
            "Cannot use {} option with -consulOnlyForLock argument",
            sqlroot
        ))
    };

    let consul = if consul_only_for_lock { None } else { consul };

    match sqlroot {
        SQLROOT_BINARY if consul.is_some() => Err(with_consul()),
        SQLROOT_BINARY => executable_dir(),
        SQLROOT_PLAYBOOK if consul.is_some() => Ok(parent_consul_key(playbook)),
        SQLROOT_PLAYBOOK => playbook_dir(playbook),
        SQLROOT_PLAYBOOK_CHILD if consul_only_for_lock => Err(with_consul_only_for_lock()),
        SQLROOT_PLAYBOOK_CHILD if consul.is_some() => Ok(playbook.to_string()),
        SQLROOT_PLAYBOOK_CHILD => Err(without_consul()),
        other => Ok(other.to_string()),
    }
}

fn executable_dir() -> RunnerResult<String> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(|dir| dir.display().to_string())
        .ok_or_else(|| {
            RunnerError::InvalidOptions("cannot locate the executable's directory".to_string())
        })
}

fn playbook_dir(playbook: &str) -> RunnerResult<String> {
    let absolute = match Path::new(playbook).parent() {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) if !dir.as_os_str().is_empty() => std::env::current_dir()?.join(dir),
        _ => std::env::current_dir()?,
    };
    Ok(absolute.display().to_string())
}

/// The key one level up: `a/b/playbook.yml` becomes `a/b`.
pub fn parent_consul_key(key: &str) -> String {
    match key.rfind('/') {
        Some(index) => key[..index].to_string(),
        None => String::new(),
    }
}

/// Parses `--var` values. Each may hold several comma-separated `key=value`
/// pairs; pairs without `=` are ignored and later keys win.
pub fn parse_cli_variables(values: &[String]) -> HashMap<String, String> {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
