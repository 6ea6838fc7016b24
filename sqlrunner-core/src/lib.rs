#![allow(clippy::type_complexity, clippy::derivable_impls)]

pub mod backends;
pub mod config;
pub mod consul;
pub mod engine;
pub mod error;
pub mod lock;
pub mod models;
pub mod options;
pub mod playbook;
pub mod prepare;
pub mod review;
pub mod selection;
pub mod sql;
pub mod template;

pub use backends::{
    BackendFactory, BackendRegistry, BigQueryClient, BigQueryFactory, DynBackendFactory,
    DynTargetClient, GoogleCredentials, MySqlClient, MySqlFactory, PostgresClient,
    PostgresFactory, SnowflakeClient, SnowflakeFactory, TargetClient,
};
pub use config::{get_config_dir, ConnectionConfig, ConsulConfig, LoggingConfig, RunnerConfig};
pub use consul::ConsulClient;
pub use engine::{PreviewSink, RunOptions, Runner, StdoutPreview};
pub use error::{RunnerError, RunnerResult};
pub use lock::LockFile;
pub use models::{
    BackendType, Playbook, Query, QueryStatus, ReadyQuery, ReadyStep, ResultTable, Step,
    StepStatus, Target, TargetError, TargetStatus, Variables,
};
pub use options::{
    parse_cli_variables, resolve_options, LockOperation, LockSpec, PlaybookSource, RawOptions,
    ResolvedOptions, SqlSource,
};
pub use playbook::{ConsulPlaybookProvider, PlaybookProvider, YamlFilePlaybookProvider};
pub use prepare::{load_steps, prepare_query};
pub use review::{review, RunReport};
pub use selection::select_steps;
pub use sql::{ConsulSqlProvider, FileSqlProvider, SqlProvider};
pub use template::{
    AwsCredentials, CredentialResolver, HelperRegistry, TemplateEngine, TemplateHelper,
};
