//! Container service composition.
//!
//! A service is one task definition with exactly one container, run on an
//! existing cluster inside an existing network. Secret variables reach the
//! container only as [`ResolvedSecrets`], so the environment cannot be
//! assembled before every secret resolved.

mod container;
pub mod limits;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use container::{
    ContainerDefinition, ContainerDefinitionBuilder, ContainerImage, DEFAULT_IMAGE_TAG,
};

use crate::{
    error::{Result, TopologyError},
    locator::{ClusterRef, NetworkRef},
    secret::{ResolvedSecrets, ensure_no_sensitive_literals},
};

/// Default task size: a quarter vCPU.
pub const DEFAULT_CPU: u32 = 256;
/// Default task memory in MiB.
pub const DEFAULT_MEMORY_MIB: u32 = 512;
/// Default number of running tasks.
pub const DEFAULT_DESIRED_COUNT: u32 = 1;
/// Default log retention in days.
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 7;

fn default_cpu() -> u32 {
    DEFAULT_CPU
}

fn default_memory_mib() -> u32 {
    DEFAULT_MEMORY_MIB
}

fn default_desired_count() -> u32 {
    DEFAULT_DESIRED_COUNT
}

fn default_log_retention_days() -> u32 {
    DEFAULT_LOG_RETENTION_DAYS
}

/// Requested shape of a container service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service name, also used as task family and container name.
    pub service_name: String,
    /// Container image.
    pub image: ContainerImage,
    /// Port the container listens on.
    pub port: u16,
    /// CPU units (1024 = one vCPU).
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    /// Memory in MiB.
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,
    /// Number of tasks to keep running.
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    /// Whether tasks receive a public IP.
    #[serde(default)]
    pub assign_public_ip: bool,
    /// Non-sensitive environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Log group name, `/ecs/<service_name>` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_group_name: Option<String>,
    /// Log retention in days.
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

impl ServiceSpec {
    pub fn new(service_name: impl Into<String>, image: ContainerImage, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            image,
            port,
            cpu: DEFAULT_CPU,
            memory_mib: DEFAULT_MEMORY_MIB,
            desired_count: DEFAULT_DESIRED_COUNT,
            assign_public_ip: false,
            environment: BTreeMap::new(),
            log_group_name: None,
            log_retention_days: DEFAULT_LOG_RETENTION_DAYS,
        }
    }

    /// Resolved log group name.
    pub fn log_group_name(&self) -> String {
        self.log_group_name
            .clone()
            .unwrap_or_else(|| format!("/ecs/{}", self.service_name))
    }

    /// Check every locally verifiable field.
    pub fn validate(&self) -> Result<()> {
        limits::validate_service_name(&self.service_name)?;
        limits::validate_port(self.port)?;
        limits::validate_task_size(self.cpu, self.memory_mib)?;
        limits::validate_desired_count(self.desired_count)?;
        limits::validate_log_retention(self.log_retention_days)?;
        limits::validate_log_group_name(&self.log_group_name())?;
        ensure_no_sensitive_literals("container environment", self.environment.keys())?;
        Ok(())
    }
}

/// Log sink created alongside the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LogSink {
    pub group_name: String,
    pub retention_days: u32,
}

/// Task definition with its single container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSpec {
    pub family: String,
    pub cpu: u32,
    pub memory_mib: u32,
    pub container: ContainerDefinition,
    pub log_sink: LogSink,
}

impl TaskSpec {
    /// Port the task's container listens on.
    pub fn port(&self) -> u16 {
        self.container.port
    }

    pub fn containers(&self) -> &[ContainerDefinition] {
        std::slice::from_ref(&self.container)
    }
}

/// A running service bound to an existing cluster and network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDeployment {
    pub service_name: String,
    pub cluster: ClusterRef,
    pub network: NetworkRef,
    pub desired_count: u32,
    pub task: TaskSpec,
    pub assign_public_ip: bool,
}

impl ServiceDeployment {
    /// Build the service described by `spec` on `cluster` in `network`.
    pub fn compose(
        spec: &ServiceSpec,
        secrets: ResolvedSecrets,
        cluster: &ClusterRef,
        network: &NetworkRef,
    ) -> Result<Self> {
        spec.validate()?;

        if cluster.network_id() != network.id() {
            return Err(TopologyError::invalid(
                "cluster",
                format!(
                    "{} runs in network {}, not {}",
                    cluster.name(),
                    cluster.network_id(),
                    network.id()
                ),
            ));
        }

        let container = ContainerDefinitionBuilder::new(&spec.service_name, spec.image.clone())
            .port(spec.port)
            .literals(&spec.environment)
            .secrets(secrets)
            .log_stream_prefix(&spec.service_name)
            .build()?;

        let log_sink = LogSink {
            group_name: spec.log_group_name(),
            retention_days: spec.log_retention_days,
        };

        tracing::debug!(
            service = %spec.service_name,
            image = %spec.image,
            port = spec.port,
            cpu = spec.cpu,
            memory_mib = spec.memory_mib,
            secrets = container.environment.values().filter(|v| v.is_secret()).count(),
            log_group = %log_sink.group_name,
            "Composed service"
        );

        Ok(Self {
            service_name: spec.service_name.clone(),
            cluster: cluster.clone(),
            network: network.clone(),
            desired_count: spec.desired_count,
            task: TaskSpec {
                family: spec.service_name.clone(),
                cpu: spec.cpu,
                memory_mib: spec.memory_mib,
                container,
                log_sink,
            },
            assign_public_ip: spec.assign_public_ip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec = ServiceSpec::new("api", ContainerImage::new("api", "v1"), 4000);
        assert_eq!(spec.cpu, 256);
        assert_eq!(spec.memory_mib, 512);
        assert_eq!(spec.desired_count, 1);
        assert_eq!(spec.log_group_name(), "/ecs/api");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_spec_from_toml_uses_defaults() {
        let spec: ServiceSpec = toml::from_str(
            r#"
service_name = "api"
port = 4000
image = { image = "ghcr.io/owner/api", tag = "v1" }
"#,
        )
        .unwrap();

        assert_eq!(spec.cpu, DEFAULT_CPU);
        assert_eq!(spec.log_retention_days, DEFAULT_LOG_RETENTION_DAYS);
        assert!(!spec.assign_public_ip);
    }

    #[test]
    fn test_spec_validation() {
        let base = ServiceSpec::new("api", ContainerImage::new("api", "v1"), 4000);

        let mut spec = base.clone();
        spec.port = 0;
        assert!(spec.validate().unwrap_err().is_invalid_spec());

        let mut spec = base.clone();
        spec.memory_mib = 4096;
        assert!(spec.validate().unwrap_err().is_invalid_spec());

        let mut spec = base.clone();
        spec.desired_count = 0;
        assert!(spec.validate().is_err());

        let mut spec = base.clone();
        spec.log_retention_days = 10;
        assert!(spec.validate().is_err());

        let mut spec = base;
        spec.environment
            .insert("SECRET_KEY_BASE".to_string(), "plaintext".to_string());
        assert!(spec.validate().is_err());
    }
}
