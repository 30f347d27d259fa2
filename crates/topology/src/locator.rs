//! Lookups of pre-existing shared infrastructure.
//!
//! Networks, clusters and listeners are never created here. A lookup is a
//! [`LookupKey`] resolved once per run into a concrete handle; handles are not
//! cached across runs.

use std::{collections::BTreeMap, fmt, future::Future};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TopologyError};

/// Kinds of shared infrastructure the locator resolves.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Cluster,
    Listener,
}

/// How a shared resource is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "lowercase")]
pub enum LookupKey {
    /// Lookup by resource name.
    Name { name: String },
    /// Lookup by a single tag pair.
    Tag { key: String, value: String },
}

impl LookupKey {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name { name: name.into() }
    }

    pub fn tag(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Tag {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name { name } => write!(f, "name={name}"),
            Self::Tag { key, value } => write!(f, "tag {key}={value}"),
        }
    }
}

/// Load balancer listener protocol.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

/// A network as reported by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: String,
    pub name: String,
}

/// A container cluster as reported by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub name: String,
    pub arn: String,
    /// Id of the network the cluster runs in.
    pub network_id: String,
}

/// A load balancer listener as reported by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRecord {
    pub arn: String,
    pub load_balancer_arn: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    /// Tags carried by the listener's load balancer.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Read-only query interface over existing infrastructure.
///
/// Implementations return every match; deciding what zero or several matches
/// mean is up to the [`Locator`].
pub trait Inventory: Send + Sync {
    fn networks_named(
        &self,
        name: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<NetworkRecord>>> + Send;

    fn clusters_named(
        &self,
        name: &str,
        network_id: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<ClusterRecord>>> + Send;

    fn listeners_tagged(
        &self,
        key: &str,
        value: &str,
        protocol: Protocol,
    ) -> impl Future<Output = anyhow::Result<Vec<ListenerRecord>>> + Send;
}

/// Handle to an existing network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NetworkRef {
    lookup: LookupKey,
    id: String,
}

impl NetworkRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lookup(&self) -> &LookupKey {
        &self.lookup
    }
}

/// Handle to an existing container cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClusterRef {
    lookup: LookupKey,
    name: String,
    arn: String,
    network_id: String,
}

impl ClusterRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arn(&self) -> &str {
        &self.arn
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn lookup(&self) -> &LookupKey {
        &self.lookup
    }
}

/// Handle to an existing load balancer listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerRef {
    lookup: LookupKey,
    arn: String,
    load_balancer_arn: String,
    port: u16,
    protocol: Protocol,
}

impl ListenerRef {
    pub fn arn(&self) -> &str {
        &self.arn
    }

    pub fn load_balancer_arn(&self) -> &str {
        &self.load_balancer_arn
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn lookup(&self) -> &LookupKey {
        &self.lookup
    }
}

/// Where to find the shared listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerLookup {
    pub tag_key: String,
    pub tag_value: String,
    #[serde(default)]
    pub protocol: Protocol,
}

/// Shared infrastructure resolved for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedInfrastructure {
    network: NetworkRef,
    cluster: ClusterRef,
    listener: ListenerRef,
}

impl LocatedInfrastructure {
    pub fn network(&self) -> &NetworkRef {
        &self.network
    }

    pub fn cluster(&self) -> &ClusterRef {
        &self.cluster
    }

    pub fn listener(&self) -> &ListenerRef {
        &self.listener
    }
}

/// Resolves lookups against an [`Inventory`].
pub struct Locator<'a, I> {
    inventory: &'a I,
}

impl<'a, I: Inventory> Locator<'a, I> {
    pub fn new(inventory: &'a I) -> Self {
        Self { inventory }
    }

    /// Find the network called `name`.
    pub async fn locate_network(&self, name: &str) -> Result<NetworkRef> {
        let key = LookupKey::name(name);
        tracing::debug!(kind = %ResourceKind::Network, %key, "Looking up resource");

        let matches = self
            .inventory
            .networks_named(name)
            .await
            .map_err(|err| inventory_error(ResourceKind::Network, &key, err))?;
        let record = single(ResourceKind::Network, &key, matches)?;

        Ok(NetworkRef {
            lookup: key,
            id: record.id,
        })
    }

    /// Find the cluster called `name` inside `network`.
    pub async fn locate_cluster(&self, name: &str, network: &NetworkRef) -> Result<ClusterRef> {
        let key = LookupKey::name(name);
        tracing::debug!(kind = %ResourceKind::Cluster, %key, network = network.id(), "Looking up resource");

        let matches = self
            .inventory
            .clusters_named(name, network.id())
            .await
            .map_err(|err| inventory_error(ResourceKind::Cluster, &key, err))?;
        let record = single(ResourceKind::Cluster, &key, matches)?;

        Ok(ClusterRef {
            lookup: key,
            name: record.name,
            arn: record.arn,
            network_id: record.network_id,
        })
    }

    /// Find the listener whose load balancer carries `tag_key=tag_value` and
    /// speaks `protocol`.
    ///
    /// Tags are not guaranteed unique, so more than one match is an error.
    pub async fn locate_listener(
        &self,
        tag_key: &str,
        tag_value: &str,
        protocol: Protocol,
    ) -> Result<ListenerRef> {
        let key = LookupKey::tag(tag_key, tag_value);
        tracing::debug!(kind = %ResourceKind::Listener, %key, %protocol, "Looking up resource");

        let matches = self
            .inventory
            .listeners_tagged(tag_key, tag_value, protocol)
            .await
            .map_err(|err| inventory_error(ResourceKind::Listener, &key, err))?;
        let record = single(ResourceKind::Listener, &key, matches)?;

        Ok(ListenerRef {
            lookup: key,
            arn: record.arn,
            load_balancer_arn: record.load_balancer_arn,
            port: record.port,
            protocol: record.protocol,
        })
    }

    /// Resolve the network, the cluster inside it and the listener.
    ///
    /// The listener lookup runs concurrently with the network and cluster lookups.
    pub async fn locate_all(
        &self,
        network_name: &str,
        cluster_name: &str,
        listener: &ListenerLookup,
    ) -> Result<LocatedInfrastructure> {
        let network_and_cluster = async {
            let network = self.locate_network(network_name).await?;
            let cluster = self.locate_cluster(cluster_name, &network).await?;
            Ok::<_, TopologyError>((network, cluster))
        };
        let listener = self.locate_listener(&listener.tag_key, &listener.tag_value, listener.protocol);

        let ((network, cluster), listener) = tokio::try_join!(network_and_cluster, listener)?;

        Ok(LocatedInfrastructure {
            network,
            cluster,
            listener,
        })
    }
}

fn inventory_error(kind: ResourceKind, key: &LookupKey, err: anyhow::Error) -> TopologyError {
    TopologyError::InventoryAccess {
        kind,
        key: key.clone(),
        message: format!("{err:#}"),
    }
}

/// Require exactly one match.
fn single<T>(kind: ResourceKind, key: &LookupKey, matches: Vec<T>) -> Result<T> {
    let count = matches.len();
    let mut matches = matches.into_iter();
    match (matches.next(), count) {
        (Some(record), 1) => Ok(record),
        (None, _) => Err(TopologyError::ResourceNotFound {
            kind,
            key: key.clone(),
        }),
        (Some(_), matches) => Err(TopologyError::AmbiguousResource {
            kind,
            key: key.clone(),
            matches,
        }),
    }
}
