use async_trait::async_trait;
use sqlrunner_core::review::{
    EXIT_INIT_ERRORS, EXIT_NOTHING_RAN, EXIT_QUERY_ERRORS, EXIT_SUCCESS,
};
use sqlrunner_core::{
    review, BackendFactory, BackendRegistry, BackendType, ConnectionConfig, ConsulClient,
    ConsulPlaybookProvider, ConsulSqlProvider, DynTargetClient, FileSqlProvider, HelperRegistry,
    PlaybookProvider, QueryStatus, ReadyQuery, RunOptions, Runner, RunnerResult, Target,
    TargetClient, TemplateEngine, YamlFilePlaybookProvider,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Records executed scripts per target; any script mentioning `broken_table`
/// fails the way a real backend would.
struct RecordingClient {
    target: Target,
    executed: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl TargetClient for RecordingClient {
    fn target(&self) -> &Target {
        &self.target
    }

    async fn is_connectable(&self) -> bool {
        true
    }

    async fn run_query(
        &self,
        query: Arc<ReadyQuery>,
        dry_run: bool,
        _show_output: bool,
    ) -> QueryStatus {
        if dry_run {
            return QueryStatus::success(query, 0);
        }
        self.executed
            .lock()
            .unwrap()
            .push((self.target.name.clone(), query.script.clone()));
        if query.script.contains("broken_table") {
            QueryStatus::failure(query, "relation \"broken_table\" does not exist")
        } else {
            QueryStatus::success(query, 2)
        }
    }
}

struct RecordingFactory {
    executed: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl BackendFactory for RecordingFactory {
    fn name(&self) -> &str {
        "recording"
    }

    async fn connect(
        &self,
        target: &Target,
        _config: &ConnectionConfig,
        _pool_size: u32,
    ) -> RunnerResult<DynTargetClient> {
        Ok(Arc::new(RecordingClient {
            target: target.clone(),
            executed: Arc::clone(&self.executed),
        }))
    }
}

struct Harness {
    templates: Arc<TemplateEngine>,
    registry: Arc<BackendRegistry>,
    executed: Arc<Mutex<Vec<(String, String)>>>,
}

fn harness() -> Harness {
    let executed = Arc::new(Mutex::new(Vec::new()));
    let factory = Arc::new(RecordingFactory {
        executed: Arc::clone(&executed),
    });
    let registry = BackendRegistry::new(ConnectionConfig::default())
        .register(BackendType::Postgres, factory.clone())
        .register(BackendType::Redshift, factory);

    let helpers = HelperRegistry::empty().with_fn("systemEnv", |args: &[String]| {
        Ok(std::env::var(&args[0]).unwrap_or_default())
    });

    Harness {
        templates: Arc::new(TemplateEngine::new(Arc::new(helpers))),
        registry: Arc::new(registry),
        executed,
    }
}

const PLAYBOOK: &str = r#"
:targets:
  - :name: warehouse
    :type: redshift
    :host: {{.host}}
    :port: 5439
  - :name: replica
    :type: postgres
    :host: {{.host}}
:variables:
  :schema: atomic
:steps:
  - :name: create
    :queries:
      - :name: schema
        :file: create/schema.sql
        :template: true
  - :name: load
    :queries:
      - :name: events
        :file: load/events.sql
      - :name: users
        :file: load/users.sql
"#;

fn write_sql(root: &Path) {
    std::fs::create_dir_all(root.join("create")).unwrap();
    std::fs::create_dir_all(root.join("load")).unwrap();
    std::fs::write(
        root.join("create/schema.sql"),
        "CREATE SCHEMA IF NOT EXISTS {{.schema}};",
    )
    .unwrap();
    std::fs::write(root.join("load/events.sql"), "INSERT INTO events SELECT 1;").unwrap();
    std::fs::write(root.join("load/users.sql"), "INSERT INTO users SELECT 1;").unwrap();
}

mod file_playbook_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_run_from_yaml() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        write_sql(dir.path());
        let playbook_path = dir.path().join("playbook.yml");
        std::fs::write(&playbook_path, PLAYBOOK).unwrap();

        let mut cli_vars = HashMap::new();
        cli_vars.insert("host".to_string(), "db.internal".to_string());
        cli_vars.insert("schema".to_string(), "derived".to_string());

        let provider =
            YamlFilePlaybookProvider::new(&playbook_path, cli_vars.clone(), Arc::clone(&h.templates));
        let playbook = provider
            .get_playbook()
            .await
            .unwrap()
            .merge_cli_variables(&cli_vars);

        assert_eq!(playbook.targets[0].host, "db.internal");
        assert_eq!(playbook.targets[0].port, "5439");

        let runner = Runner::new(
            Arc::clone(&h.registry),
            Arc::new(FileSqlProvider::new(dir.path())),
            Arc::clone(&h.templates),
        );
        let statuses = runner.run(&playbook, &RunOptions::default()).await.unwrap();

        let (code, message) = review(&statuses);
        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(message, "SUCCESS: 6 queries executed against 2 targets");

        let executed = h.executed.lock().unwrap();
        assert_eq!(executed.len(), 6);
        // CLI variables override playbook variables
        assert!(executed
            .iter()
            .any(|(_, script)| script == "CREATE SCHEMA IF NOT EXISTS derived;"));
    }

    #[tokio::test]
    async fn test_failure_stops_later_steps() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        write_sql(dir.path());
        std::fs::write(dir.path().join("load/users.sql"), "INSERT INTO broken_table SELECT 1;")
            .unwrap();

        let yaml = format!(
            "{}  - name: report\n    queries:\n      - name: daily\n        file: load/events.sql\n",
            PLAYBOOK
        );
        let playbook_path = dir.path().join("playbook.yml");
        std::fs::write(&playbook_path, yaml).unwrap();

        let provider =
            YamlFilePlaybookProvider::new(&playbook_path, HashMap::new(), Arc::clone(&h.templates));
        let playbook = provider.get_playbook().await.unwrap();
        assert_eq!(playbook.steps.len(), 3);

        let runner = Runner::new(
            Arc::clone(&h.registry),
            Arc::new(FileSqlProvider::new(dir.path())),
            Arc::clone(&h.templates),
        );
        let statuses = runner.run(&playbook, &RunOptions::default()).await.unwrap();

        for status in &statuses {
            assert_eq!(status.steps.len(), 2, "report step must not run");
            assert_eq!(status.steps[1].queries.len(), 2);
        }

        let (code, message) = review(&statuses);
        assert_eq!(code, EXIT_QUERY_ERRORS);
        assert!(message.contains("* Query users"));
        assert!(message.contains("(in step load @ target warehouse)"));
        assert!(!message.contains("* Query events"));
    }

    #[tokio::test]
    async fn test_from_step_and_unknown_backend() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        write_sql(dir.path());
        let yaml = PLAYBOOK.replace(":type: postgres", ":type: oracle");
        let playbook_path = dir.path().join("playbook.yml");
        std::fs::write(&playbook_path, yaml).unwrap();

        let provider =
            YamlFilePlaybookProvider::new(&playbook_path, HashMap::new(), Arc::clone(&h.templates));
        let playbook = provider.get_playbook().await.unwrap();

        let runner = Runner::new(
            Arc::clone(&h.registry),
            Arc::new(FileSqlProvider::new(dir.path())),
            Arc::clone(&h.templates),
        );
        let options = RunOptions {
            from_step: Some("load".to_string()),
            ..Default::default()
        };
        let statuses = runner.run(&playbook, &options).await.unwrap();

        assert_eq!(statuses[0].steps.len(), 1);
        assert_eq!(statuses[0].steps[0].name, "load");
        assert!(statuses[1].has_init_errors());

        let (code, message) = review(&statuses);
        assert_eq!(code, EXIT_INIT_ERRORS);
        assert!(message.contains("Database type is unsupported: oracle"));
    }

    #[tokio::test]
    async fn test_empty_playbook_is_nothing_ran() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        let playbook_path = dir.path().join("playbook.yml");
        std::fs::write(&playbook_path, "targets:\nsteps:\n").unwrap();

        let provider =
            YamlFilePlaybookProvider::new(&playbook_path, HashMap::new(), Arc::clone(&h.templates));
        let playbook = provider.get_playbook().await.unwrap();
        assert!(playbook.is_empty());

        let runner = Runner::new(
            Arc::clone(&h.registry),
            Arc::new(FileSqlProvider::new(dir.path())),
            Arc::clone(&h.templates),
        );
        let statuses = runner.run(&playbook, &RunOptions::default()).await.unwrap();
        assert_eq!(review(&statuses).0, EXIT_NOTHING_RAN);
    }
}

mod consul_playbook_tests {
    use super::*;

    #[tokio::test]
    async fn test_playbook_and_sql_from_consul() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/playbooks/nightly/playbook.yml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "targets:\n  - name: pg\n    type: postgres\nsteps:\n  - name: only\n    queries:\n      - name: q\n        file: q.sql\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/playbooks/nightly/q.sql"))
            .respond_with(ResponseTemplate::new(200).set_body_string("DELETE FROM staging;"))
            .mount(&server)
            .await;

        let h = harness();
        let client = ConsulClient::new(&server.uri()).unwrap();
        let provider = ConsulPlaybookProvider::new(
            client.clone(),
            "playbooks/nightly/playbook.yml",
            HashMap::new(),
            Arc::clone(&h.templates),
        );
        let playbook = provider.get_playbook().await.unwrap();

        let runner = Runner::new(
            Arc::clone(&h.registry),
            Arc::new(ConsulSqlProvider::new(client, "playbooks/nightly")),
            Arc::clone(&h.templates),
        );
        let statuses = runner.run(&playbook, &RunOptions::default()).await.unwrap();

        assert_eq!(review(&statuses).0, EXIT_SUCCESS);
        assert_eq!(statuses[0].steps[0].queries[0].path, "playbooks/nightly/q.sql");
        assert_eq!(
            *h.executed.lock().unwrap(),
            vec![("pg".to_string(), "DELETE FROM staging;".to_string())]
        );
    }
}
