//! tierstack-topology - Deployment topology builder for two-tier web applications.
//!
//! A topology pairs a statically hosted front end, built from a source
//! repository, with a containerized back end placed behind an existing shared
//! load balancer. Secrets are read from a parameter store and existing
//! infrastructure from an inventory; the assembled [`DeploymentTopology`] is
//! handed to a provisioning backend.

mod assembler;
pub use assembler::{Assembly, AssemblyStage, AssemblyWarning, StackAssembler};

mod config;
pub use config::{BackendConfig, CONFIG_FILENAME, FrontendConfig, StackConfig};

mod error;
pub use error::{Result, TopologyError};

mod local;
pub use local::{StaticInventory, StaticParameterStore};

mod locator;
pub use locator::{
    ClusterRecord, ClusterRef, Inventory, ListenerLookup, ListenerRecord, ListenerRef,
    LocatedInfrastructure, Locator, LookupKey, NetworkRecord, NetworkRef, Protocol, ResourceKind,
};

pub mod pipeline;
pub use pipeline::{BuildPipeline, BuildSpec, CustomRule, DomainMapping, RedirectStatus};

pub mod routing;
pub use routing::{RoutingPlan, RoutingRule, TargetGroup, TargetType, route};

mod secret;
pub use secret::{
    EnvValue, ParameterStore, ResolvedSecrets, SecretRef, SecretResolver, is_sensitive_name,
};

pub mod service;
pub use service::{
    ContainerDefinition, ContainerImage, LogSink, ServiceDeployment, ServiceSpec, TaskSpec,
};

mod topology;
pub use topology::{
    BackendTopology, DeploymentTopology, NodeKind, Provenance, ResourceNode, TopologyDocument,
};
