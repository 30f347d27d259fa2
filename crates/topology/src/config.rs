//! Deployment definition, saved and loaded as TOML.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TopologyError},
    locator::ListenerLookup,
    pipeline::validate_source,
    routing::{normalize_host_headers, validate_priority},
    secret::{ensure_no_sensitive_literals, validate_parameter_name},
    service::ServiceSpec,
};

/// The default name for the deployment definition file.
pub const CONFIG_FILENAME: &str = "Tierstack.toml";

/// Static front end built from a source repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendConfig {
    pub source_owner: String,
    pub source_repo: String,
    /// Parameter holding the source provider access token.
    pub auth_token_parameter: String,
    pub domain_name: String,
    pub branch_name: String,
    pub subdomain_name: String,
    /// Plain build-time variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Build-time variables read from the parameter store, `variable = "parameter"`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
}

/// Container service behind the shared load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// The `[backend.service]` table.
    pub service: ServiceSpec,
    /// Container variables read from the parameter store, `variable = "parameter"`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
    /// Name of the existing network.
    pub network_name: String,
    /// Name of the existing cluster.
    pub cluster_name: String,
    /// Tag lookup of the existing shared listener.
    pub listener: ListenerLookup,
    /// Host names routed to the service.
    pub host_headers: Vec<String>,
    /// Rule priority on the shared listener.
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
}

/// One deployment definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,
}

impl StackConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            frontend: None,
            backend: None,
        }
    }

    pub fn with_frontend(mut self, frontend: FrontendConfig) -> Self {
        self.frontend = Some(frontend);
        self
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Check everything that can be checked without external calls.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(TopologyError::invalid("app name", "must not be empty"));
        }

        if let Some(frontend) = &self.frontend {
            frontend.validate()?;
        }
        if let Some(backend) = &self.backend {
            backend.validate()?;
        }
        Ok(())
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize stack config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// The definition file behind `path`: the file itself, or
    /// [`CONFIG_FILENAME`] when `path` is a directory.
    pub fn resolve_path(path: &Path) -> anyhow::Result<PathBuf> {
        if !path.exists() {
            anyhow::bail!(
                "Configuration file or directory not found: {}",
                path.display()
            );
        }

        if path.is_dir() {
            Ok(path.join(CONFIG_FILENAME))
        } else {
            Ok(path.to_path_buf())
        }
    }

    /// Load the configuration from a TOML file, or from [`CONFIG_FILENAME`]
    /// inside a directory.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let config_path = Self::resolve_path(path)?;

        let content = std::fs::read_to_string(&config_path)
            .context(format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }
}

impl FrontendConfig {
    fn validate(&self) -> Result<()> {
        validate_parameter_name(&self.auth_token_parameter)?;
        self.secrets
            .values()
            .try_for_each(|parameter| validate_parameter_name(parameter))?;
        ensure_no_sensitive_literals("build environment", self.environment.keys())?;
        if let Some(name) = self.secrets.keys().find(|n| self.environment.contains_key(*n)) {
            return Err(TopologyError::invalid(
                "build environment",
                format!("{name} is defined both as a literal and as a secret"),
            ));
        }

        validate_source(
            &self.source_owner,
            &self.source_repo,
            &self.domain_name,
            &self.branch_name,
            &self.subdomain_name,
        )
    }
}

impl BackendConfig {
    fn validate(&self) -> Result<()> {
        self.service.validate()?;
        validate_priority(self.priority)?;
        normalize_host_headers(&self.host_headers)?;
        self.secrets
            .values()
            .try_for_each(|parameter| validate_parameter_name(parameter))?;
        if let Some(name) = self
            .secrets
            .keys()
            .find(|n| self.service.environment.contains_key(*n))
        {
            return Err(TopologyError::invalid(
                "container environment",
                format!("{name} is defined both as a literal and as a secret"),
            ));
        }
        if self.network_name.trim().is_empty() {
            return Err(TopologyError::invalid("network name", "must not be empty"));
        }
        if self.cluster_name.trim().is_empty() {
            return Err(TopologyError::invalid("cluster name", "must not be empty"));
        }
        if self.listener.tag_key.trim().is_empty() {
            return Err(TopologyError::invalid("listener tag key", "must not be empty"));
        }
        if let Some(path) = &self.health_check_path {
            if !path.starts_with('/') {
                return Err(TopologyError::invalid(
                    "health check path",
                    format!("{path:?} must start with '/'"),
                ));
            }
        }
        Ok(())
    }
}
