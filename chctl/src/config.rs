//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides. The file path defaults to `config.yaml` but can be specified
//! via the `-f` flag or `CHCTL_CONFIG`. Variables prefixed with `CHCTL_`
//! override YAML values; nested keys use double underscores, e.g.
//! `CHCTL_CLICKHOUSE__PASSWORD=secret` sets `clickhouse.password`.
//!
//! The desired-state declarations live in a separate file (`-d` flag or
//! `CHCTL_DECLARATIONS`, default `declarations.yaml`); see [`crate::spec`].

use clap::Parser;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::privileges::AllPrivileges;

/// Simple CLI args - config and declarations paths plus run-mode flags.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CHCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Path to the desired-state declarations file
    #[arg(short = 'd', long, env = "CHCTL_DECLARATIONS", default_value = "declarations.yaml")]
    pub declarations: String,

    /// Validate configuration and declarations, then exit without contacting
    /// the server. Useful for CI pipelines.
    #[arg(long)]
    pub validate: bool,

    /// Plan every entity and report, but execute nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Connection settings for the managed server
    pub clickhouse: ClickHouseConfig,
    /// Cluster name for cluster-wide statements. When unset it is resolved
    /// from `system.clusters` at startup; if that also fails, cluster-wide
    /// execution soft-fails to local.
    pub cluster_name: Option<String>,
    /// Server version override for version-gated behavior. When unset it is
    /// resolved with `SELECT version()` at startup.
    pub server_version: Option<String>,
    /// Override of the privilege list substituted for `ALL` in declarations.
    /// Defaults to a built-in snapshot of backend behavior; set this when
    /// tracking a release whose expansion differs.
    pub all_privileges: Option<Vec<String>>,
}

/// ClickHouse HTTP interface connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClickHouseConfig {
    /// Base URL of the HTTP interface
    pub url: Url,
    /// User statements are executed as; needs ACCESS MANAGEMENT
    pub user: String,
    /// Password, if any. Prefer `CHCTL_CLICKHOUSE__PASSWORD` over the file.
    pub password: Option<String>,
    /// Per-statement timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://localhost:8123").expect("valid default url"),
            user: "default".to_string(),
            password: None,
            timeout_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clickhouse: ClickHouseConfig::default(),
            cluster_name: None,
            server_version: None,
            all_privileges: None,
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        if config.clickhouse.user.is_empty() {
            return Err(figment::Error::from("clickhouse.user cannot be empty".to_string()));
        }
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // CHCTL_CONFIG and CHCTL_DECLARATIONS belong to Args, not Config.
            .merge(Env::prefixed("CHCTL_").ignore(&["config", "declarations"]).split("__"))
    }

    /// The `ALL` expansion list this deployment runs with.
    pub fn all_privileges(&self) -> AllPrivileges {
        match &self.all_privileges {
            Some(list) => AllPrivileges::from_list(list.clone()),
            None => AllPrivileges::for_version(self.server_version.as_deref()),
        }
    }
}
