use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn sql_runner_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sql-runner"))
}

fn run_sql_runner(args: &[&str]) -> Output {
    run_sql_runner_in(args, &std::env::temp_dir())
}

fn run_sql_runner_in(args: &[&str], cwd: &Path) -> Output {
    Command::new(sql_runner_binary())
        .args(args)
        .current_dir(cwd)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute sql-runner")
}

fn output_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn write_playbook(dir: &Path, target_type: &str) -> PathBuf {
    std::fs::write(dir.join("schema.sql"), "CREATE SCHEMA {{.schema}};").unwrap();
    let playbook = dir.join("playbook.yml");
    std::fs::write(
        &playbook,
        format!(
            "targets:\n  - name: local\n    type: {}\n    host: 127.0.0.1\n    port: 1\n\
             variables:\n  schema: atomic\n\
             steps:\n  - name: setup\n    queries:\n      - name: schema\n        file: schema.sql\n        template: true\n",
            target_type
        ),
    )
    .unwrap();
    playbook
}

mod help_and_version_tests {
    use super::*;

    #[test]
    fn test_no_arguments_prints_help() {
        let output = run_sql_runner(&[]);
        let stdout = output_to_string(&output);

        assert!(output.status.success());
        assert!(stdout.contains("--playbook"));
        assert!(stdout.contains("--run-query"));
    }

    #[test]
    fn test_version_flag() {
        let output = run_sql_runner(&["--version"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success());
        assert!(stdout.contains("sql-runner"));
        assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let output = run_sql_runner(&["--no-such-flag"]);
        assert!(!output.status.success());
    }
}

mod usage_error_tests {
    use super::*;

    #[test]
    fn test_missing_playbook() {
        let output = run_sql_runner(&["--dry-run"]);

        assert_eq!(output.status.code(), Some(2));
        assert!(output_to_string(&output).contains("required flag not defined: -playbook"));
    }

    #[test]
    fn test_playbook_child_needs_consul() {
        let output = run_sql_runner(&["--playbook", "p.yml", "--sqlroot", "PLAYBOOK_CHILD"]);
        let stdout = output_to_string(&output);

        assert_eq!(output.status.code(), Some(2));
        assert!(stdout.contains("Error resolving -sqlroot: PLAYBOOK_CHILD"));
        assert!(stdout.contains("Cannot use PLAYBOOK_CHILD option without -consul argument"));
    }

    #[test]
    fn test_camel_case_aliases_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = write_playbook(dir.path(), "postgres");
        let output = run_sql_runner(&[
            "--playbook",
            playbook.to_str().unwrap(),
            "--fromStep",
            "missing",
        ]);

        assert_eq!(output.status.code(), Some(5));
        assert!(stderr_to_string(&output)
            .contains("The fromStep argument did not match any available steps: missing"));
    }
}

mod lock_command_tests {
    use super::*;

    #[test]
    fn test_check_lock_absent_and_present() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("run.lock");
        let lock = lock.to_str().unwrap();

        let output = run_sql_runner(&["--check-lock", lock]);
        assert_eq!(output.status.code(), Some(0));
        assert!(output_to_string(&output).contains("does not exist"));

        std::fs::write(lock, "2024-01-01T00:00:00+0000").unwrap();
        let output = run_sql_runner(&["--checkLock", lock]);
        assert_eq!(output.status.code(), Some(3));
        assert!(output_to_string(&output).contains("previous run failed or is ongoing"));
    }

    #[test]
    fn test_delete_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("run.lock");
        let lock_str = lock.to_str().unwrap();

        let output = run_sql_runner(&["--delete-lock", lock_str]);
        assert_eq!(output.status.code(), Some(1));
        assert!(output_to_string(&output).contains("nothing to delete"));

        std::fs::write(&lock, "2024-01-01T00:00:00+0000").unwrap();
        let output = run_sql_runner(&["--delete-lock", lock_str]);
        assert_eq!(output.status.code(), Some(0));
        assert!(output_to_string(&output).contains("found and deleted"));
        assert!(!lock.exists());
    }

    #[test]
    fn test_existing_lock_blocks_run() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = write_playbook(dir.path(), "postgres");
        let lock = dir.path().join("run.lock");
        std::fs::write(&lock, "2024-01-01T00:00:00+0000").unwrap();

        let output = run_sql_runner(&[
            "--playbook",
            playbook.to_str().unwrap(),
            "--lock",
            lock.to_str().unwrap(),
        ]);

        assert_eq!(output.status.code(), Some(3));
        assert!(stderr_to_string(&output).contains("found on start"));
    }
}

mod run_tests {
    use super::*;

    #[test]
    fn test_fill_templates_prints_sql() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = write_playbook(dir.path(), "postgres");

        let output = run_sql_runner(&[
            "--playbook",
            playbook.to_str().unwrap(),
            "--fill-templates",
        ]);
        let stdout = output_to_string(&output);

        assert_eq!(output.status.code(), Some(8));
        assert!(stdout.contains("Step name: setup"));
        assert!(stdout.contains("Query name: schema"));
        assert!(stdout.contains("CREATE SCHEMA atomic;"));
        assert!(stderr_to_string(&output).contains("WARNING: No queries to run"));
    }

    #[test]
    fn test_cli_variable_overrides_playbook() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = write_playbook(dir.path(), "postgres");

        let output = run_sql_runner(&[
            "--playbook",
            playbook.to_str().unwrap(),
            "--fillTemplates",
            "--var",
            "schema=derived,ignored",
        ]);

        assert!(output_to_string(&output).contains("CREATE SCHEMA derived;"));
    }

    #[test]
    fn test_unsupported_backend() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = write_playbook(dir.path(), "oracle");

        let output = run_sql_runner(&["--playbook", playbook.to_str().unwrap()]);
        let stderr = stderr_to_string(&output);

        assert_eq!(output.status.code(), Some(5));
        assert!(stderr.contains("TARGET INITIALIZATION FAILURES:"));
        assert!(stderr.contains("Database type is unsupported: oracle"));
    }

    #[test]
    fn test_malformed_run_query() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = write_playbook(dir.path(), "postgres");

        let output = run_sql_runner(&[
            "--playbook",
            playbook.to_str().unwrap(),
            "--run-query",
            "setup",
        ]);

        assert_eq!(output.status.code(), Some(5));
        assert!(stderr_to_string(&output)
            .contains("The runQuery argument must have the form 'step::query': 'setup'"));
    }

    #[test]
    fn test_missing_sql_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = write_playbook(dir.path(), "postgres");
        std::fs::remove_file(dir.path().join("schema.sql")).unwrap();

        let output = run_sql_runner(&["--playbook", playbook.to_str().unwrap()]);

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr_to_string(&output).contains("An error occurred loading the SQL file"));
    }

    #[test]
    fn test_empty_playbook() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = dir.path().join("empty.yml");
        std::fs::write(&playbook, "targets: []\nsteps: []\n").unwrap();

        let output = run_sql_runner(&["--playbook", playbook.to_str().unwrap()]);
        assert_eq!(output.status.code(), Some(8));
    }

    #[test]
    fn test_dry_run_against_unreachable_target_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = write_playbook(dir.path(), "postgres");
        let config = dir.path().join("sql-runner.toml");
        std::fs::write(&config, "[connection]\nconnect_timeout_secs = 1\n").unwrap();
        let lock = dir.path().join("dry.lock");

        let output = run_sql_runner_in(
            &[
                "--playbook",
                playbook.to_str().unwrap(),
                "--dry-run",
                "--lock",
                lock.to_str().unwrap(),
                "--format",
                "json",
            ],
            dir.path(),
        );
        let stdout = output_to_string(&output);

        assert_eq!(output.status.code(), Some(0));
        let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
        assert_eq!(report["exit_code"], 0);
        assert_eq!(report["targets"][0]["steps"][0]["queries"][0]["affected"], 0);
        // no lock is taken on a dry run
        assert!(!lock.exists());
    }

    #[test]
    fn test_invalid_config_is_a_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = write_playbook(dir.path(), "postgres");
        let config = dir.path().join("sql-runner.toml");
        std::fs::write(&config, "[connection]\nread_timeout_secs = 0\n").unwrap();

        let output = run_sql_runner_in(
            &[
                "--config",
                config.to_str().unwrap(),
                "--playbook",
                playbook.to_str().unwrap(),
            ],
            dir.path(),
        );

        assert_eq!(output.status.code(), Some(2));
        assert!(stderr_to_string(&output).contains("connection.read_timeout_secs"));
    }
}
