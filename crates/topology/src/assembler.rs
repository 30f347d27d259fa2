//! Orchestration of one assembly run.
//!
//! Stages run in a fixed order: local validation, then secret resolution and
//! infrastructure lookups (concurrently, joined before anything is composed),
//! then pipeline description, service composition and routing. The first
//! failure aborts the run and no topology is returned.

use derive_more::Display;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    config::{BackendConfig, FrontendConfig, StackConfig},
    error::{Result, TopologyError},
    locator::{Inventory, LocatedInfrastructure, Locator},
    pipeline::BuildPipeline,
    routing::{DEFAULT_HEALTH_CHECK_PATH, RoutingPlan, route_with_health_check},
    secret::{ParameterStore, ResolvedSecrets, SecretRef, SecretResolver},
    service::ServiceDeployment,
    topology::{BackendTopology, DeploymentTopology, NodeKind},
};

/// Stage of an assembly run, reported when a run aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AssemblyStage {
    Validate,
    Resolve,
    Locate,
    Describe,
    Compose,
    Route,
}

/// Non-fatal observation made while assembling.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum AssemblyWarning {
    /// An existing resource is referenced and left unmodified.
    #[display("existing {kind} {id} is referenced and left unmodified")]
    ExistingResourceReused { kind: NodeKind, id: String },

    /// Neither a front end nor a back end was requested.
    #[display("topology declares no resources")]
    EmptyTopology,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub topology: DeploymentTopology,
    pub warnings: Vec<AssemblyWarning>,
}

/// Secrets and infrastructure gathered before composition.
struct Resolved {
    frontend: Option<(SecretRef, ResolvedSecrets)>,
    backend_secrets: Option<ResolvedSecrets>,
    infrastructure: Option<LocatedInfrastructure>,
}

/// Builds a [`DeploymentTopology`] from a [`StackConfig`].
///
/// Routing rules of every successful run are kept in a [`RoutingPlan`], so a
/// later run that claims a priority another service already holds on the same
/// listener fails at [`AssemblyStage::Route`].
pub struct StackAssembler<'a, S, I> {
    store: &'a S,
    inventory: &'a I,
    plan: Mutex<RoutingPlan>,
}

impl<'a, S: ParameterStore, I: Inventory> StackAssembler<'a, S, I> {
    pub fn new(store: &'a S, inventory: &'a I) -> Self {
        Self {
            store,
            inventory,
            plan: Mutex::new(RoutingPlan::default()),
        }
    }

    /// Start from rules routed elsewhere, e.g. by another assembler.
    pub fn with_plan(mut self, plan: RoutingPlan) -> Self {
        self.plan = Mutex::new(plan);
        self
    }

    /// The rules routed by every run so far.
    pub fn into_plan(self) -> RoutingPlan {
        self.plan.into_inner()
    }

    /// Assemble the topology described by `config`.
    ///
    /// Errors are wrapped in [`TopologyError::AssemblyAborted`] with the stage
    /// that failed.
    pub async fn assemble(&self, config: &StackConfig) -> Result<Assembly> {
        tracing::info!(app = %config.app_name, "Assembling deployment topology");

        stage(AssemblyStage::Validate, || config.validate())?;

        let resolved = self.resolve(config).await?;

        let pipeline = match (&config.frontend, resolved.frontend) {
            (Some(frontend), Some((token, secrets))) => Some(stage(AssemblyStage::Describe, || {
                describe(frontend, token, secrets)
            })?),
            _ => None,
        };

        let backend = match (
            &config.backend,
            resolved.backend_secrets,
            resolved.infrastructure,
        ) {
            (Some(backend), Some(secrets), Some(infrastructure)) => {
                let mut plan = self.plan.lock().await;
                Some(compose_backend(backend, secrets, &infrastructure, &mut plan)?)
            }
            _ => None,
        };

        let topology = DeploymentTopology::new(config.app_name.clone(), pipeline, backend);
        let warnings = collect_warnings(&topology);
        for warning in &warnings {
            tracing::warn!(%warning, "Assembly warning");
        }

        tracing::info!(
            app = %topology.app_name(),
            resources = topology.graph().len(),
            warnings = warnings.len(),
            "Deployment topology assembled"
        );

        Ok(Assembly { topology, warnings })
    }

    /// Resolve every secret and locate the shared infrastructure.
    ///
    /// All lookups run concurrently and are joined before returning.
    async fn resolve(&self, config: &StackConfig) -> Result<Resolved> {
        tracing::info!(
            stage = %AssemblyStage::Resolve,
            "Resolving secrets and shared infrastructure"
        );

        let resolver = SecretResolver::new(self.store);
        let locator = Locator::new(self.inventory);

        let frontend = async {
            let Some(frontend) = &config.frontend else {
                return Ok(None);
            };
            let (token, secrets) = tokio::try_join!(
                resolver.resolve(&frontend.auth_token_parameter),
                resolver.resolve_all(&frontend.secrets)
            )
            .map_err(|e| e.aborted(AssemblyStage::Resolve))?;
            Ok::<_, TopologyError>(Some((token, secrets)))
        };

        let backend_secrets = async {
            let Some(backend) = &config.backend else {
                return Ok(None);
            };
            resolver
                .resolve_all(&backend.secrets)
                .await
                .map(Some)
                .map_err(|e| e.aborted(AssemblyStage::Resolve))
        };

        let infrastructure = async {
            let Some(backend) = &config.backend else {
                return Ok(None);
            };
            locator
                .locate_all(&backend.network_name, &backend.cluster_name, &backend.listener)
                .await
                .map(Some)
                .map_err(|e| e.aborted(AssemblyStage::Locate))
        };

        let (frontend, backend_secrets, infrastructure) =
            tokio::try_join!(frontend, backend_secrets, infrastructure)?;

        tracing::info!(
            frontend = frontend.is_some(),
            backend = infrastructure.is_some(),
            "Secrets and shared infrastructure resolved"
        );

        Ok(Resolved {
            frontend,
            backend_secrets,
            infrastructure,
        })
    }
}

fn stage<T>(stage: AssemblyStage, f: impl FnOnce() -> Result<T>) -> Result<T> {
    tracing::info!(%stage, "Running assembly stage");
    f().map_err(|e| e.aborted(stage))
}

fn describe(
    frontend: &FrontendConfig,
    token: SecretRef,
    secrets: ResolvedSecrets,
) -> Result<BuildPipeline> {
    BuildPipeline::describe(
        &frontend.source_owner,
        &frontend.source_repo,
        token,
        &frontend.domain_name,
        &frontend.branch_name,
        &frontend.subdomain_name,
    )?
    .with_environment(&frontend.environment, secrets)
}

fn compose_backend(
    backend: &BackendConfig,
    secrets: ResolvedSecrets,
    infrastructure: &LocatedInfrastructure,
    plan: &mut RoutingPlan,
) -> Result<BackendTopology> {
    let service = stage(AssemblyStage::Compose, || {
        ServiceDeployment::compose(
            &backend.service,
            secrets,
            infrastructure.cluster(),
            infrastructure.network(),
        )
    })?;

    let (target_group, rule) = stage(AssemblyStage::Route, || {
        let (target_group, rule) = route_with_health_check(
            &service,
            infrastructure.listener(),
            &backend.host_headers,
            backend.priority,
            backend
                .health_check_path
                .as_deref()
                .unwrap_or(DEFAULT_HEALTH_CHECK_PATH),
        )?;

        plan.add(rule.clone())?;
        Ok((target_group, rule))
    })?;

    Ok(BackendTopology {
        service,
        target_group,
        rule,
    })
}

fn collect_warnings(topology: &DeploymentTopology) -> Vec<AssemblyWarning> {
    if topology.is_empty() {
        return vec![AssemblyWarning::EmptyTopology];
    }

    topology
        .existing_resources()
        .into_iter()
        .filter(|node| node.kind != NodeKind::Parameter)
        .map(|node| AssemblyWarning::ExistingResourceReused {
            kind: node.kind,
            id: node.id,
        })
        .collect()
}
