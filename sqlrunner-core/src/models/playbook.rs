use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use crate::error::RunnerError;

/// Playbook variables. Values keep their YAML shape so nested mappings can
/// be addressed from templates (`{{.a.b}}`).
pub type Variables = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default, deserialize_with = "null_as_default")]
    pub targets: Vec<Target>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub variables: Variables,

    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub name: String,

    /// Raw backend tag as written in the playbook. Unknown tags are kept so
    /// the target can be reported as unsupported instead of failing the parse.
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub host: String,

    #[serde(default, deserialize_with = "string_or_number")]
    pub port: String,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub account: String,

    #[serde(default)]
    pub warehouse: String,

    #[serde(default)]
    pub project: String,

    #[serde(default)]
    pub ssl: bool,

    #[serde(default, alias = "querytag", alias = "queryTag")]
    pub query_tag: String,

    #[serde(default, alias = "privatekeypath", alias = "privateKeyPath")]
    pub private_key_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub queries: Vec<Query>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub name: String,

    /// Source reference, resolved by the active SQL provider.
    #[serde(default)]
    pub file: String,

    #[serde(default)]
    pub template: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    Postgres,
    Redshift,
    MySql,
    Snowflake,
    BigQuery,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Postgres => write!(f, "postgres"),
            BackendType::Redshift => write!(f, "redshift"),
            BackendType::MySql => write!(f, "mysql"),
            BackendType::Snowflake => write!(f, "snowflake"),
            BackendType::BigQuery => write!(f, "bigquery"),
        }
    }
}

impl FromStr for BackendType {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(BackendType::Postgres),
            "redshift" => Ok(BackendType::Redshift),
            "mysql" => Ok(BackendType::MySql),
            "snowflake" => Ok(BackendType::Snowflake),
            "bigquery" => Ok(BackendType::BigQuery),
            _ => Err(RunnerError::UnsupportedBackend(s.to_string())),
        }
    }
}

impl Target {
    pub fn backend_type(&self) -> Result<BackendType, RunnerError> {
        self.kind.parse()
    }

    pub fn port_number(&self) -> Result<Option<u16>, RunnerError> {
        if self.port.trim().is_empty() {
            return Ok(None);
        }
        self.port
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|e| RunnerError::InvalidConnectionParameter {
                target: self.name.clone(),
                parameter: "port".to_string(),
                message: e.to_string(),
            })
    }
}

impl Playbook {
    pub fn new(targets: Vec<Target>, steps: Vec<Step>) -> Self {
        Self {
            targets,
            variables: Variables::new(),
            steps,
        }
    }

    /// Returns a copy with the CLI variables layered on top; CLI values win
    /// by key.
    pub fn merge_cli_variables(&self, cli_variables: &HashMap<String, String>) -> Playbook {
        let mut merged = self.clone();
        for (key, value) in cli_variables {
            merged
                .variables
                .insert(key.clone(), serde_yaml::Value::String(value.clone()));
        }
        merged
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty() || self.steps.iter().all(|s| s.queries.is_empty())
    }

    pub fn query_count(&self) -> usize {
        self.steps.iter().map(|s| s.queries.len()).sum()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(String::new()),
        Some(serde_yaml::Value::String(s)) => Ok(s),
        Some(serde_yaml::Value::Number(n)) => Ok(n.to_string()),
        Some(serde_yaml::Value::Bool(b)) => Ok(b.to_string()),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number for port, got {:?}",
            other
        ))),
    }
}
