//! Container image references and container definitions.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TopologyError},
    secret::{EnvValue, ResolvedSecrets, ensure_no_sensitive_literals},
};

/// Tag used when an image reference carries none.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// A container image reference with image name and tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerImage {
    /// The image name (e.g., "ghcr.io/maxrchung/functional-vote-api").
    pub image: String,
    /// The image tag (e.g., "latest" or "v1.0.0").
    pub tag: String,
}

impl ContainerImage {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
        }
    }

    /// Get the full image reference (image:tag).
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

impl fmt::Display for ContainerImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}

impl FromStr for ContainerImage {
    type Err = TopologyError;

    /// Parse `image[:tag]`. A colon before the last `/` belongs to a registry
    /// port, not a tag.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(TopologyError::invalid(
                "image",
                format!("{s:?} is not a valid image reference"),
            ));
        }

        let last_slash = s.rfind('/').map_or(0, |i| i + 1);
        match s[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let (image, tag) = (&s[..split], &s[split + 1..]);
                if image.is_empty() || tag.is_empty() {
                    return Err(TopologyError::invalid(
                        "image",
                        format!("{s:?} is not a valid image reference"),
                    ));
                }
                Ok(Self::new(image, tag))
            }
            None => Ok(Self::new(s, DEFAULT_IMAGE_TAG)),
        }
    }
}

/// The single container of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: ContainerImage,
    /// Port the container listens on.
    pub port: u16,
    pub environment: BTreeMap<String, EnvValue>,
    /// Prefix for the container's log streams.
    pub log_stream_prefix: String,
    pub essential: bool,
}

/// Builder for a [`ContainerDefinition`].
#[derive(Debug, Clone)]
pub struct ContainerDefinitionBuilder {
    name: String,
    image: ContainerImage,
    port: Option<u16>,
    literals: BTreeMap<String, String>,
    secrets: ResolvedSecrets,
    log_stream_prefix: Option<String>,
}

impl ContainerDefinitionBuilder {
    pub fn new(name: impl Into<String>, image: ContainerImage) -> Self {
        Self {
            name: name.into(),
            image,
            port: None,
            literals: BTreeMap::new(),
            secrets: ResolvedSecrets::empty(),
            log_stream_prefix: None,
        }
    }

    /// Set the port the container listens on.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Add plain environment variables.
    pub fn literals(mut self, literals: &BTreeMap<String, String>) -> Self {
        self.literals
            .extend(literals.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Set the resolved secret variables.
    pub fn secrets(mut self, secrets: ResolvedSecrets) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn log_stream_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_stream_prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> Result<ContainerDefinition> {
        let port = self
            .port
            .ok_or_else(|| TopologyError::invalid("port", "container port is required"))?;

        ensure_no_sensitive_literals("container environment", self.literals.keys())?;

        let mut environment: BTreeMap<String, EnvValue> = self
            .literals
            .into_iter()
            .map(|(name, value)| (name, EnvValue::Literal(value)))
            .collect();

        for (name, secret) in self.secrets.into_inner() {
            if environment.contains_key(&name) {
                return Err(TopologyError::invalid(
                    "container environment",
                    format!("{name} is defined both as a literal and as a secret"),
                ));
            }
            environment.insert(name, EnvValue::Secret(secret));
        }

        Ok(ContainerDefinition {
            log_stream_prefix: self.log_stream_prefix.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            image: self.image,
            port,
            environment,
            essential: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::SecretRef;

    #[test]
    fn test_parse_image() {
        let image: ContainerImage = "ghcr.io/owner/api:v1.2".parse().unwrap();
        assert_eq!(image, ContainerImage::new("ghcr.io/owner/api", "v1.2"));

        let image: ContainerImage = "nginx".parse().unwrap();
        assert_eq!(image.full_name(), "nginx:latest");

        let image: ContainerImage = "localhost:5000/api".parse().unwrap();
        assert_eq!(image, ContainerImage::new("localhost:5000/api", "latest"));

        let image: ContainerImage = "localhost:5000/api:dev".parse().unwrap();
        assert_eq!(image, ContainerImage::new("localhost:5000/api", "dev"));

        assert!("".parse::<ContainerImage>().is_err());
        assert!("api:".parse::<ContainerImage>().is_err());
        assert!("my api".parse::<ContainerImage>().is_err());
    }

    #[test]
    fn test_build_container() {
        let secrets = ResolvedSecrets::from_map(BTreeMap::from([(
            "DATABASE_URL".to_string(),
            SecretRef::new("prod/db-url", "postgres://db"),
        )]));

        let container = ContainerDefinitionBuilder::new("api", ContainerImage::new("api", "v1"))
            .port(4000)
            .literals(&BTreeMap::from([("MIX_ENV".to_string(), "prod".to_string())]))
            .secrets(secrets)
            .build()
            .unwrap();

        assert_eq!(container.port, 4000);
        assert_eq!(container.log_stream_prefix, "api");
        assert!(container.environment["DATABASE_URL"].is_secret());
        assert!(!container.environment["MIX_ENV"].is_secret());
    }

    #[test]
    fn test_port_is_required() {
        let err = ContainerDefinitionBuilder::new("api", ContainerImage::new("api", "v1"))
            .build()
            .unwrap_err();
        assert!(err.is_invalid_spec());
    }

    #[test]
    fn test_sensitive_literal_rejected() {
        let err = ContainerDefinitionBuilder::new("api", ContainerImage::new("api", "v1"))
            .port(4000)
            .literals(&BTreeMap::from([(
                "DATABASE_URL".to_string(),
                "postgres://user:pw@db".to_string(),
            )]))
            .build()
            .unwrap_err();
        assert!(err.is_invalid_spec());
    }

    #[test]
    fn test_literal_and_secret_collision() {
        let secrets = ResolvedSecrets::from_map(BTreeMap::from([(
            "FEATURE_FLAGS".to_string(),
            SecretRef::new("prod/flags", "a,b"),
        )]));

        let err = ContainerDefinitionBuilder::new("api", ContainerImage::new("api", "v1"))
            .port(4000)
            .literals(&BTreeMap::from([("FEATURE_FLAGS".to_string(), "a".to_string())]))
            .secrets(secrets)
            .build()
            .unwrap_err();
        assert!(err.is_invalid_spec());
    }
}
