//! File-backed collaborators for composing a topology offline.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    locator::{ClusterRecord, Inventory, ListenerRecord, NetworkRecord, Protocol},
    secret::ParameterStore,
};

/// Parameter store backed by an in-memory table.
///
/// The file form is a TOML table under `[parameters]`:
///
/// ```toml
/// [parameters]
/// github-personal-access-token = "ghp_..."
/// ```
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StaticParameterStore {
    #[serde(default)]
    parameters: BTreeMap<String, String>,
}

impl std::fmt::Debug for StaticParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticParameterStore")
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StaticParameterStore {
    /// Add a parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Load parameters from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read parameters from {}", path.display()))?;
        let store: Self =
            toml::from_str(&content).context("Failed to parse parameters file as TOML")?;
        tracing::info!(path = %path.display(), count = store.len(), "Parameters loaded");
        Ok(store)
    }
}

impl ParameterStore for StaticParameterStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.parameters.get(name).cloned())
    }
}

/// Infrastructure inventory backed by in-memory records.
///
/// The file form lists `[[networks]]`, `[[clusters]]` and `[[listeners]]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticInventory {
    #[serde(default)]
    pub networks: Vec<NetworkRecord>,
    #[serde(default)]
    pub clusters: Vec<ClusterRecord>,
    #[serde(default)]
    pub listeners: Vec<ListenerRecord>,
}

impl StaticInventory {
    pub fn with_network(mut self, network: NetworkRecord) -> Self {
        self.networks.push(network);
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterRecord) -> Self {
        self.clusters.push(cluster);
        self
    }

    pub fn with_listener(mut self, listener: ListenerRecord) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Load an inventory snapshot from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read inventory from {}", path.display()))?;
        let inventory: Self =
            toml::from_str(&content).context("Failed to parse inventory file as TOML")?;
        tracing::info!(
            path = %path.display(),
            networks = inventory.networks.len(),
            clusters = inventory.clusters.len(),
            listeners = inventory.listeners.len(),
            "Inventory loaded"
        );
        Ok(inventory)
    }
}

impl Inventory for StaticInventory {
    async fn networks_named(&self, name: &str) -> Result<Vec<NetworkRecord>> {
        Ok(self
            .networks
            .iter()
            .filter(|network| network.name == name)
            .cloned()
            .collect())
    }

    async fn clusters_named(&self, name: &str, network_id: &str) -> Result<Vec<ClusterRecord>> {
        Ok(self
            .clusters
            .iter()
            .filter(|cluster| cluster.name == name && cluster.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn listeners_tagged(
        &self,
        key: &str,
        value: &str,
        protocol: Protocol,
    ) -> Result<Vec<ListenerRecord>> {
        Ok(self
            .listeners
            .iter()
            .filter(|listener| {
                listener.protocol == protocol
                    && listener.tags.get(key).is_some_and(|v| v == value)
            })
            .cloned()
            .collect())
    }
}
