use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use tierstack_topology::{CONFIG_FILENAME, StackConfig, StaticInventory, StaticParameterStore};
use tracing::level_filters::LevelFilter;

/// Prefix of environment variables overriding the deployment definition.
///
/// Nested keys are separated by `__`, e.g. `TIERSTACK_STACK_BACKEND__PRIORITY=20`
/// or `TIERSTACK_STACK_BACKEND__SERVICE__IMAGE__TAG=1.5.0`.
pub const STACK_ENV_PREFIX: &str = "TIERSTACK_STACK_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    /// Resource table followed by warnings.
    #[default]
    Table,
    /// The topology document as JSON.
    Json,
}

#[derive(Parser)]
#[command(name = "tierstack")]
#[command(
    author,
    version,
    about = "Assemble the deployment topology of a two-tier web application"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "TIERSTACK_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the deployment definition, or to a directory containing Tierstack.toml.
    #[arg(short, long, alias = "conf", env = "TIERSTACK_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    /// TOML file with the parameter store contents, under a `[parameters]` table.
    ///
    /// If not provided, every secret lookup fails.
    #[arg(short, long, alias = "params", env = "TIERSTACK_PARAMETERS")]
    pub parameters: Option<PathBuf>,

    /// TOML file listing the existing networks, clusters and listeners.
    ///
    /// If not provided, every infrastructure lookup fails.
    #[arg(short, long, env = "TIERSTACK_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Where to write the topology document.
    #[arg(short, long, alias = "out", env = "TIERSTACK_OUTPUT")]
    pub output: Option<PathBuf>,

    /// How to print the assembled topology.
    #[arg(long, env = "TIERSTACK_FORMAT", default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

impl Cli {
    /// Load the deployment definition, layered with `TIERSTACK_STACK_*` overrides.
    pub fn load_stack_config(&self) -> anyhow::Result<StackConfig> {
        load_stack_config(&self.config)
    }

    pub fn load_parameters(&self) -> anyhow::Result<StaticParameterStore> {
        match &self.parameters {
            Some(path) => StaticParameterStore::load_from_file(path),
            None => Ok(StaticParameterStore::default()),
        }
    }

    pub fn load_inventory(&self) -> anyhow::Result<StaticInventory> {
        match &self.inventory {
            Some(path) => StaticInventory::load_from_file(path),
            None => Ok(StaticInventory::default()),
        }
    }
}

fn load_stack_config(path: &Path) -> anyhow::Result<StackConfig> {
    let config_path = StackConfig::resolve_path(path)?;

    let config: StackConfig = Figment::new()
        .merge(Toml::file(&config_path))
        .merge(Env::prefixed(STACK_ENV_PREFIX).split("__"))
        .extract()
        .context(format!(
            "Failed to load configuration from {}",
            config_path.display()
        ))?;

    tracing::info!(
        path = %config_path.display(),
        app = %config.app_name,
        frontend = config.frontend.is_some(),
        backend = config.backend.is_some(),
        "Configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use tempdir::TempDir;

    const CONFIG: &str = r#"
app_name = "functional-vote"

[backend]
network_name = "shared-vpc"
cluster_name = "shared-cluster"
host_headers = ["api.example.com"]
priority = 10

[backend.service]
service_name = "functional-vote-api"
port = 4000

[backend.service.image]
image = "ghcr.io/maxrchung/functional-vote-api"
tag = "1.4.2"

[backend.listener]
tag_key = "shared"
tag_value = "true"
protocol = "HTTPS"
"#;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["tierstack"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILENAME));
        assert_eq!(cli.format, OutputFormat::Table);
        assert!(cli.parameters.is_none());
        assert!(cli.output.is_none());
    }

    #[test]
    fn test_cli_format_parsing() {
        let cli = Cli::try_parse_from(["tierstack", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(Cli::try_parse_from(["tierstack", "--format", "yaml"]).is_err());
    }

    #[test]
    fn test_load_config_from_directory() {
        let temp_dir = TempDir::new("tierstack-test").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join(CONFIG_FILENAME), CONFIG).unwrap();

        let config = load_stack_config(temp_dir.path()).unwrap();
        assert_eq!(config.app_name, "functional-vote");

        let backend = config.backend.expect("backend section");
        assert_eq!(backend.service.port, 4000);
        assert_eq!(backend.service.cpu, 256);
        assert_eq!(backend.priority, 10);
        assert!(config.frontend.is_none());
    }

    #[test]
    fn test_env_overrides_backend_fields() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILENAME, CONFIG)?;
            jail.set_env("TIERSTACK_STACK_BACKEND__SERVICE__IMAGE__TAG", "2");
            jail.set_env("TIERSTACK_STACK_BACKEND__PRIORITY", "20");

            let config =
                load_stack_config(Path::new(CONFIG_FILENAME)).map_err(|e| e.to_string())?;
            let backend = config.backend.expect("backend section");
            assert_eq!(backend.service.image.tag, "2");
            assert_eq!(backend.service.image.image, "ghcr.io/maxrchung/functional-vote-api");
            assert_eq!(backend.priority, 20);
            Ok(())
        });
    }

    #[test]
    fn test_load_missing_config() {
        let temp_dir = TempDir::new("tierstack-test").expect("Failed to create temp dir");
        assert!(load_stack_config(&temp_dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_missing_collaborator_files_default_to_empty() {
        let cli = Cli::try_parse_from(["tierstack"]).unwrap();
        assert!(cli.load_parameters().unwrap().is_empty());
        assert!(cli.load_inventory().unwrap().networks.is_empty());
    }
}
