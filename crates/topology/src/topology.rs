//! The assembled deployment topology and its resource graph.

use std::{
    collections::BTreeSet,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    pipeline::BuildPipeline,
    routing::{RoutingRule, TargetGroup},
    service::ServiceDeployment,
};

/// Back end of a topology: a service, its target group and its listener rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendTopology {
    pub service: ServiceDeployment,
    pub target_group: TargetGroup,
    pub rule: RoutingRule,
}

/// Complete, resolved description of one deployable application.
///
/// Built once by the assembler and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentTopology {
    app_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline: Option<BuildPipeline>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<BackendTopology>,
}

/// Kind of a node in the resource graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NodeKind {
    Parameter,
    Network,
    Cluster,
    Listener,
    StaticSite,
    Branch,
    DomainAssociation,
    LogGroup,
    TaskDefinition,
    TargetGroup,
    ListenerRule,
    Service,
}

/// Whether a node is looked up or declared by this topology.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provenance {
    /// Already exists and is left unmodified.
    Existing,
    /// Created or updated by the provisioning backend.
    Declared,
}

/// One resource in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: String,
    pub kind: NodeKind,
    pub provenance: Provenance,
    /// Ids of nodes that must exist before this one.
    pub depends_on: Vec<String>,
}

/// Resource nodes in dependency order.
#[derive(Debug, Default)]
struct GraphBuilder {
    nodes: Vec<ResourceNode>,
    seen: BTreeSet<String>,
}

impl GraphBuilder {
    fn push(
        &mut self,
        kind: NodeKind,
        provenance: Provenance,
        name: &str,
        depends_on: impl IntoIterator<Item = String>,
    ) -> String {
        let id = format!("{kind}/{name}");
        if self.seen.insert(id.clone()) {
            self.nodes.push(ResourceNode {
                id: id.clone(),
                kind,
                provenance,
                depends_on: depends_on.into_iter().collect(),
            });
        }
        id
    }

    fn existing(&mut self, kind: NodeKind, name: &str) -> String {
        self.push(kind, Provenance::Existing, name, [])
    }
}

impl DeploymentTopology {
    pub(crate) fn new(
        app_name: String,
        pipeline: Option<BuildPipeline>,
        backend: Option<BackendTopology>,
    ) -> Self {
        Self {
            app_name,
            pipeline,
            backend,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn pipeline(&self) -> Option<&BuildPipeline> {
        self.pipeline.as_ref()
    }

    pub fn backend(&self) -> Option<&BackendTopology> {
        self.backend.as_ref()
    }

    pub fn service(&self) -> Option<&ServiceDeployment> {
        self.backend.as_ref().map(|b| &b.service)
    }

    pub fn target_group(&self) -> Option<&TargetGroup> {
        self.backend.as_ref().map(|b| &b.target_group)
    }

    pub fn rule(&self) -> Option<&RoutingRule> {
        self.backend.as_ref().map(|b| &b.rule)
    }

    pub fn is_empty(&self) -> bool {
        self.pipeline.is_none() && self.backend.is_none()
    }

    /// The resource graph, every node after the nodes it depends on.
    pub fn graph(&self) -> Vec<ResourceNode> {
        let mut graph = GraphBuilder::default();

        if let Some(pipeline) = &self.pipeline {
            // Each parameter is depended on once, even when a build variable
            // reads the auth token or several variables share a parameter.
            let token = pipeline.auth_token.name();
            let secrets: BTreeSet<&str> = pipeline
                .environment
                .values()
                .filter_map(|value| match value {
                    crate::EnvValue::Secret(secret) => Some(secret.name()),
                    crate::EnvValue::Literal(_) => None,
                })
                .filter(|name| *name != token)
                .collect();
            let deps: Vec<String> = std::iter::once(token)
                .chain(secrets)
                .map(|name| graph.existing(NodeKind::Parameter, name))
                .collect();
            let app = graph.push(NodeKind::StaticSite, Provenance::Declared, &self.app_name, deps);
            let branch = graph.push(
                NodeKind::Branch,
                Provenance::Declared,
                &pipeline.branch_name,
                [app.clone()],
            );
            graph.push(
                NodeKind::DomainAssociation,
                Provenance::Declared,
                &pipeline.domain_name,
                [app, branch],
            );
        }

        if let Some(backend) = &self.backend {
            let service = &backend.service;
            let task = &service.task;

            let network = graph.existing(NodeKind::Network, service.network.id());
            let cluster = graph.existing(NodeKind::Cluster, service.cluster.name());
            let listener = graph.existing(NodeKind::Listener, backend.rule.listener.arn());
            let parameters: Vec<String> = task
                .container
                .environment
                .values()
                .filter_map(|value| match value {
                    crate::EnvValue::Secret(secret) => Some(secret.name().to_string()),
                    crate::EnvValue::Literal(_) => None,
                })
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|name| graph.existing(NodeKind::Parameter, &name))
                .collect();

            let log_group = graph.push(
                NodeKind::LogGroup,
                Provenance::Declared,
                &task.log_sink.group_name,
                [],
            );
            let task_definition = graph.push(
                NodeKind::TaskDefinition,
                Provenance::Declared,
                &task.family,
                std::iter::once(log_group).chain(parameters),
            );
            let target_group = graph.push(
                NodeKind::TargetGroup,
                Provenance::Declared,
                &backend.target_group.name,
                [network.clone()],
            );
            let rule = graph.push(
                NodeKind::ListenerRule,
                Provenance::Declared,
                &backend.rule.priority.to_string(),
                [listener, target_group.clone()],
            );
            graph.push(
                NodeKind::Service,
                Provenance::Declared,
                &service.service_name,
                [task_definition, cluster, network, target_group, rule],
            );
        }

        graph.nodes
    }

    /// Existing resources the topology references without modifying.
    pub fn existing_resources(&self) -> Vec<ResourceNode> {
        self.graph()
            .into_iter()
            .filter(|node| node.provenance == Provenance::Existing)
            .collect()
    }

    /// SHA-256 of the canonical JSON form, hex encoded.
    ///
    /// Secret values are redacted before hashing, so the fingerprint only
    /// changes with parameter names, not with their contents.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self)
            .expect("DeploymentTopology serialization should never fail");

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Topology file handed to the provisioning backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyDocument {
    /// Fingerprint of the topology.
    pub fingerprint: String,
    /// Unix timestamp when the document was generated.
    pub generated_at: u64,
    /// Version of the tool that generated it.
    pub tool_version: String,
    /// Resources in dependency order.
    pub resources: Vec<ResourceNode>,
    /// The topology itself, with secret values redacted.
    pub topology: serde_json::Value,
}

impl TopologyDocument {
    pub fn new(topology: &DeploymentTopology) -> anyhow::Result<Self> {
        Ok(Self {
            fingerprint: topology.fingerprint(),
            generated_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("System time is before the Unix epoch")?
                .as_secs(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: topology.graph(),
            topology: serde_json::to_value(topology)
                .context("Failed to serialize deployment topology")?,
        })
    }

    /// Save the document as formatted JSON.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize topology document")?;

        std::fs::write(path, json).context(format!(
            "Failed to write topology document to {}",
            path.display()
        ))?;

        tracing::info!(path = %path.display(), fingerprint = %self.fingerprint, "Topology saved");
        Ok(())
    }

    /// Load a document from a file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("Topology document does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path).context(format!(
            "Failed to read topology document from {}",
            path.display()
        ))?;

        serde_json::from_str(&content).context("Failed to parse topology document JSON")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::secret::{ResolvedSecrets, SecretRef};

    fn frontend_topology() -> DeploymentTopology {
        let pipeline = BuildPipeline::describe(
            "maxrchung",
            "FunctionalVote",
            SecretRef::new("github-personal-access-token", "ghp_abc123"),
            "example.com",
            "master",
            "app",
        )
        .unwrap()
        .with_environment(
            &BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())]),
            ResolvedSecrets::from_map(BTreeMap::from([(
                "RECAPTCHA_PUBLIC_KEY".to_string(),
                SecretRef::new("functional-vote/recaptcha-public-key", "6LeIxAc"),
            )])),
        )
        .unwrap();

        DeploymentTopology::new("functional-vote".to_string(), Some(pipeline), None)
    }

    #[test]
    fn test_frontend_graph() {
        let graph = frontend_topology().graph();
        let ids: Vec<&str> = graph.iter().map(|n| n.id.as_str()).collect();

        assert_eq!(
            ids,
            vec![
                "parameter/github-personal-access-token",
                "parameter/functional-vote/recaptcha-public-key",
                "static-site/functional-vote",
                "branch/master",
                "domain-association/example.com",
            ]
        );
        assert_eq!(graph[0].provenance, Provenance::Existing);
        assert_eq!(graph[2].depends_on.len(), 2);
        assert_eq!(
            graph[4].depends_on,
            vec!["static-site/functional-vote", "branch/master"]
        );
    }

    #[test]
    fn test_frontend_parameters_are_depended_on_once() {
        let pipeline = BuildPipeline::describe(
            "maxrchung",
            "FunctionalVote",
            SecretRef::new("github-personal-access-token", "ghp_abc123"),
            "example.com",
            "master",
            "app",
        )
        .unwrap()
        .with_environment(
            &BTreeMap::new(),
            ResolvedSecrets::from_map(BTreeMap::from([
                (
                    "GH_MIRROR".to_string(),
                    SecretRef::new("github-personal-access-token", "ghp_abc123"),
                ),
                (
                    "RECAPTCHA_PUBLIC_KEY".to_string(),
                    SecretRef::new("functional-vote/recaptcha-public-key", "6LeIxAc"),
                ),
                (
                    "RECAPTCHA_SITE_KEY".to_string(),
                    SecretRef::new("functional-vote/recaptcha-public-key", "6LeIxAc"),
                ),
            ])),
        )
        .unwrap();
        let topology = DeploymentTopology::new("functional-vote".to_string(), Some(pipeline), None);

        let graph = topology.graph();
        let site = graph
            .iter()
            .find(|n| n.kind == NodeKind::StaticSite)
            .expect("static site node");
        assert_eq!(
            site.depends_on,
            vec![
                "parameter/github-personal-access-token",
                "parameter/functional-vote/recaptcha-public-key",
            ]
        );
        assert_eq!(topology.existing_resources().len(), 2);
    }

    #[test]
    fn test_fingerprint_ignores_secret_values() {
        let topology = frontend_topology();
        let fingerprint = topology.fingerprint();
        assert_eq!(fingerprint.len(), 64);
        assert_eq!(fingerprint, topology.clone().fingerprint());

        let mut rotated = topology.clone();
        if let Some(pipeline) = rotated.pipeline.as_mut() {
            pipeline.auth_token = SecretRef::new("github-personal-access-token", "ghp_rotated");
        }
        assert_eq!(rotated.fingerprint(), fingerprint);

        let mut moved = topology;
        if let Some(pipeline) = moved.pipeline.as_mut() {
            pipeline.branch_name = "main".to_string();
        }
        assert_ne!(moved.fingerprint(), fingerprint);
    }

    #[test]
    fn test_existing_resources() {
        let existing = frontend_topology().existing_resources();
        assert_eq!(existing.len(), 2);
        assert!(existing.iter().all(|n| n.kind == NodeKind::Parameter));
    }
}
