use async_trait::async_trait;
use chrono::Local;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::aws::CredentialResolver;
use super::go_time;
use crate::error::{RunnerError, RunnerResult};

/// A function callable from templates as `{{name "arg" ...}}`.
#[async_trait]
pub trait TemplateHelper: Send + Sync {
    async fn call(&self, args: &[String]) -> RunnerResult<String>;
}

pub type DynTemplateHelper = Arc<dyn TemplateHelper>;

struct FnHelper<F>(F);

#[async_trait]
impl<F> TemplateHelper for FnHelper<F>
where
    F: Fn(&[String]) -> RunnerResult<String> + Send + Sync,
{
    async fn call(&self, args: &[String]) -> RunnerResult<String> {
        (self.0)(args)
    }
}

/// The set of helpers available to templates.
///
/// Built once at startup and shared read-only; substitute sets are built with
/// [`HelperRegistry::empty`] and [`HelperRegistry::with_helper`].
#[derive(Clone, Default)]
pub struct HelperRegistry {
    helpers: HashMap<String, DynTemplateHelper>,
}

impl std::fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperRegistry")
            .field("helpers", &self.names())
            .finish()
    }
}

impl HelperRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in helpers: time formatting, environment lookup, random
    /// numbers and the four AWS credential modes.
    pub fn with_defaults(resolver: CredentialResolver) -> Self {
        let resolver = Arc::new(resolver);
        let registry = Self::empty()
            .with_fn("nowWithFormat", |args| {
                let layout = single_arg("nowWithFormat", args)?;
                Ok(go_time::format(&Local::now().fixed_offset(), layout))
            })
            .with_fn("systemEnv", |args| {
                let name = single_arg("systemEnv", args)?;
                Ok(std::env::var(name).unwrap_or_default())
            })
            .with_fn("randomInt", |args| {
                expect_arity("randomInt", args, 0)?;
                Ok(rand::thread_rng().gen_range(0..i64::MAX).to_string())
            })
            .with_helper(
                "awsEnvCredentials",
                Arc::new(AwsHelper {
                    resolver: resolver.clone(),
                    mode: AwsMode::Env,
                }),
            )
            .with_helper(
                "awsProfileCredentials",
                Arc::new(AwsHelper {
                    resolver: resolver.clone(),
                    mode: AwsMode::Profile,
                }),
            )
            .with_helper(
                "awsEC2RoleCredentials",
                Arc::new(AwsHelper {
                    resolver: resolver.clone(),
                    mode: AwsMode::Ec2Role,
                }),
            )
            .with_helper(
                "awsChainCredentials",
                Arc::new(AwsHelper {
                    resolver,
                    mode: AwsMode::Chain,
                }),
            );

        info!(helpers = registry.helpers.len(), "Registered template helpers");
        registry
    }

    pub fn with_helper(mut self, name: impl Into<String>, helper: DynTemplateHelper) -> Self {
        self.helpers.insert(name.into(), helper);
        self
    }

    pub fn with_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[String]) -> RunnerResult<String> + Send + Sync + 'static,
    {
        self.with_helper(name, Arc::new(FnHelper(f)))
    }

    pub fn get(&self, name: &str) -> Option<DynTemplateHelper> {
        self.helpers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.helpers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Clone, Copy)]
enum AwsMode {
    Env,
    Profile,
    Ec2Role,
    Chain,
}

struct AwsHelper {
    resolver: Arc<CredentialResolver>,
    mode: AwsMode,
}

#[async_trait]
impl TemplateHelper for AwsHelper {
    async fn call(&self, args: &[String]) -> RunnerResult<String> {
        let creds = match self.mode {
            AwsMode::Env => {
                expect_arity("awsEnvCredentials", args, 0)?;
                self.resolver.env_credentials().await?
            }
            AwsMode::Profile => {
                let profile = single_arg("awsProfileCredentials", args)?;
                self.resolver.profile_credentials(profile).await?
            }
            AwsMode::Ec2Role => {
                expect_arity("awsEC2RoleCredentials", args, 0)?;
                self.resolver.ec2_role_credentials().await?
            }
            AwsMode::Chain => {
                let profile = single_arg("awsChainCredentials", args)?;
                self.resolver.chain_credentials(profile).await?
            }
        };
        Ok(creds.to_credentials_clause())
    }
}

fn expect_arity(function: &str, args: &[String], expected: usize) -> RunnerResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(RunnerError::HelperArguments {
            function: function.to_string(),
            message: format!("wrong number of args: want {} got {}", expected, args.len()),
        })
    }
}

fn single_arg<'a>(function: &str, args: &'a [String]) -> RunnerResult<&'a str> {
    expect_arity(function, args, 1)?;
    Ok(args[0].as_str())
}
