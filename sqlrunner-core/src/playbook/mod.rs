//! Loading playbooks from their source of truth.

mod consul;
mod yaml;

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::RunnerResult;
use crate::models::{Playbook, Variables};
use crate::template::TemplateEngine;

pub use consul::ConsulPlaybookProvider;
pub use yaml::YamlFilePlaybookProvider;

#[async_trait]
pub trait PlaybookProvider: Send + Sync {
    async fn get_playbook(&self) -> RunnerResult<Playbook>;
}

static LEGACY_KEY_RE: OnceLock<Regex> = OnceLock::new();

fn legacy_key_re() -> &'static Regex {
    LEGACY_KEY_RE.get_or_init(|| Regex::new(r"^(\s*-?\s*):?(.*)$").unwrap())
}

/// Drops the leading `:` that older playbooks put in front of keys
/// (`:targets:` becomes `targets:`).
pub fn clean_yaml(raw: &str) -> String {
    let re = legacy_key_re();
    raw.split('\n')
        .map(|line| re.replace(line, "${1}${2}").into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cleans the document, expands it as a template with the CLI variables,
/// then deserializes it.
pub async fn parse_playbook_yaml(
    raw: &str,
    cli_variables: &HashMap<String, String>,
    engine: &TemplateEngine,
) -> RunnerResult<Playbook> {
    let cleaned = clean_yaml(raw);

    let variables: Variables = cli_variables
        .iter()
        .map(|(k, v)| (k.clone(), serde_yaml::Value::String(v.clone())))
        .collect();
    let filled = engine.render("playbook", &cleaned, &variables).await?;

    if filled.trim().is_empty() {
        debug!("Playbook document is empty");
        return Ok(Playbook::default());
    }

    let playbook: Playbook = serde_yaml::from_str(&filled)?;
    debug!(
        targets = playbook.targets.len(),
        steps = playbook.steps.len(),
        "Parsed playbook"
    );
    Ok(playbook)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;
    use crate::template::HelperRegistry;
    use std::sync::Arc;

    const LEGACY_PLAYBOOK: &str = r#":targets:
  - :name: "My Postgres database 1"
    :type: postgres
    :host: localhost
    :database: sql_runner_tests_1
    :port: 5432
    :username: postgres
    :password: {{.password}}
    :ssl: false
:variables:
  :test_schema: sql_runner_tests
  :timeFormat: "2006_01_02"
:steps:
  - :name: create-schema
    :queries:
      - :name: create-schema
        :file: postgres-sql/good/1.sql
        :template: true
  - :name: create-tables
    :queries:
      - :name: create-table-1
        :file: postgres-sql/good/2a.sql
      - :name: create-table-2
        :file: postgres-sql/good/2b.sql
"#;

    fn engine() -> TemplateEngine {
        TemplateEngine::new(Arc::new(HelperRegistry::empty()))
    }

    #[test]
    fn test_clean_yaml() {
        assert_eq!(clean_yaml(":targets:"), "targets:");
        assert_eq!(clean_yaml("  - :name: a"), "  - name: a");
        assert_eq!(clean_yaml("    :type: postgres"), "    type: postgres");
        assert_eq!(clean_yaml("name: a:b"), "name: a:b");
        assert_eq!(clean_yaml("a\n:b: 1\n"), "a\nb: 1\n");
    }

    #[tokio::test]
    async fn test_parse_legacy_playbook() {
        let mut cli = HashMap::new();
        cli.insert("password".to_string(), "s3cret".to_string());

        let playbook = parse_playbook_yaml(LEGACY_PLAYBOOK, &cli, &engine())
            .await
            .unwrap();

        assert_eq!(playbook.targets.len(), 1);
        let target = &playbook.targets[0];
        assert_eq!(target.name, "My Postgres database 1");
        assert_eq!(target.kind, "postgres");
        assert_eq!(target.port, "5432");
        assert_eq!(target.password, "s3cret");
        assert!(!target.ssl);

        assert_eq!(
            playbook.variables["test_schema"],
            serde_yaml::Value::String("sql_runner_tests".to_string())
        );
        assert_eq!(playbook.steps.len(), 2);
        assert_eq!(playbook.steps[0].queries[0].file, "postgres-sql/good/1.sql");
        assert!(playbook.steps[0].queries[0].template);
        assert_eq!(playbook.steps[1].queries.len(), 2);
        assert!(!playbook.steps[1].queries[1].template);
    }

    #[tokio::test]
    async fn test_parse_empty_playbook() {
        let playbook = parse_playbook_yaml("", &HashMap::new(), &engine())
            .await
            .unwrap();
        assert!(playbook.is_empty());
    }

    #[tokio::test]
    async fn test_parse_invalid_yaml() {
        let err = parse_playbook_yaml("targets: [", &HashMap::new(), &engine())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::PlaybookParseFailed(_)));
    }

    #[tokio::test]
    async fn test_parse_bad_template() {
        let err = parse_playbook_yaml("targets: {{.x", &HashMap::new(), &engine())
            .await
            .unwrap_err();
        assert!(err.is_template_error());
    }
}
