//! Secret resolution against an external parameter store.
//!
//! Resolved values are wrapped in [`SecretRef`], an opaque handle whose value
//! never shows up in `Debug`, `Display` or serialized output. The only way to
//! read the value is [`SecretRef::expose`], reserved for the provisioning backend.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    future::Future,
};

use derive_more::Deref;
use futures::future::try_join_all;
use serde::{Serialize, Serializer};

use crate::error::{Result, TopologyError};

/// Marker printed in place of secret values.
const REDACTED: &str = "<redacted>";

/// Names that mark an environment variable as sensitive, matched against whole
/// `_`-separated segments of the variable name.
const SENSITIVE_MARKERS: &[&str] = &[
    "PASSWORD",
    "PASSWD",
    "SECRET",
    "TOKEN",
    "API_KEY",
    "APIKEY",
    "ACCESS_KEY",
    "PRIVATE_KEY",
    "CREDENTIAL",
    "CREDENTIALS",
    "DATABASE_URL",
    "DB_URL",
];

/// Trailing segments naming a setting about a credential rather than the
/// credential itself, e.g. `TOKEN_TTL_SECONDS`.
const SETTING_SUFFIXES: &[&str] = &[
    "TTL", "SECONDS", "MINUTES", "HOURS", "DAYS", "EXPIRY", "LENGTH", "COUNT", "ENABLED",
];

/// Read access to a key-value parameter store.
///
/// Credentials for the store are assumed to be available in the execution
/// environment.
pub trait ParameterStore: Send + Sync {
    /// Fetch the raw value of `name`.
    ///
    /// Returns `Ok(None)` when the parameter does not exist and `Err` when the
    /// store itself could not be reached.
    fn get(&self, name: &str) -> impl Future<Output = anyhow::Result<Option<String>>> + Send;
}

/// A resolved parameter value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    name: String,
    value: String,
}

impl SecretRef {
    pub(crate) fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The parameter name this value was resolved from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The plaintext value, for the provisioning backend only.
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRef")
            .field("name", &self.name)
            .field("value", &REDACTED)
            .finish()
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parameter:{}", self.name)
    }
}

impl Serialize for SecretRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Redacted<'a> {
            parameter: &'a str,
            value: &'static str,
        }

        Redacted {
            parameter: &self.name,
            value: REDACTED,
        }
        .serialize(serializer)
    }
}

/// Value of an environment variable: either a resolved secret or a plain literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvValue {
    Secret(SecretRef),
    Literal(String),
}

impl EnvValue {
    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }
}

/// Whether a variable name suggests the value is a credential.
pub fn is_sensitive_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    let segments: Vec<&str> = upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments
        .last()
        .is_some_and(|last| SETTING_SUFFIXES.contains(last))
    {
        return false;
    }

    SENSITIVE_MARKERS.iter().any(|marker| {
        let marker: Vec<&str> = marker.split('_').collect();
        segments.windows(marker.len()).any(|window| window == marker.as_slice())
    })
}

/// Check that no sensitive variable is given as a literal.
pub(crate) fn ensure_no_sensitive_literals<'a>(
    field: &str,
    literals: impl IntoIterator<Item = &'a String>,
) -> Result<()> {
    for name in literals {
        if is_sensitive_name(name) {
            return Err(TopologyError::invalid(
                field,
                format!("{name} looks sensitive and must come from the parameter store"),
            ));
        }
    }
    Ok(())
}

/// Check a parameter name against what the store accepts.
pub(crate) fn validate_parameter_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TopologyError::invalid("parameter name", "must not be empty"));
    }
    if name.len() > 2048 {
        return Err(TopologyError::invalid(
            "parameter name",
            format!("{name} is longer than 2048 characters"),
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')))
    {
        return Err(TopologyError::invalid(
            "parameter name",
            format!("{name} contains unsupported character {c:?}"),
        ));
    }
    Ok(())
}

/// Environment variables whose secrets have all been resolved, keyed by variable name.
///
/// Only [`SecretResolver::resolve_all`] produces a non-empty set, so holding one
/// proves every referenced parameter resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref)]
pub struct ResolvedSecrets(BTreeMap<String, SecretRef>);

impl ResolvedSecrets {
    /// A set with no secrets.
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn into_inner(self) -> BTreeMap<String, SecretRef> {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_map(secrets: BTreeMap<String, SecretRef>) -> Self {
        Self(secrets)
    }
}

/// Resolves parameter names into [`SecretRef`] handles.
pub struct SecretResolver<'a, S> {
    store: &'a S,
}

impl<'a, S: ParameterStore> SecretResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Resolve a single parameter.
    pub async fn resolve(&self, name: &str) -> Result<SecretRef> {
        validate_parameter_name(name)?;

        tracing::debug!(parameter = name, "Resolving parameter");

        let value = self
            .store
            .get(name)
            .await
            .map_err(|err| TopologyError::StoreAccess {
                name: name.to_string(),
                message: format!("{err:#}"),
            })?;

        match value {
            Some(value) => Ok(SecretRef::new(name, value)),
            None => Err(TopologyError::SecretNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Resolve a set of `variable -> parameter` bindings.
    ///
    /// Each distinct parameter is fetched once; lookups run concurrently and the
    /// first failure is returned.
    pub async fn resolve_all(
        &self,
        bindings: &BTreeMap<String, String>,
    ) -> Result<ResolvedSecrets> {
        let parameters: BTreeSet<&str> = bindings.values().map(String::as_str).collect();

        let resolved = try_join_all(parameters.into_iter().map(|name| self.resolve(name))).await?;
        let by_parameter: BTreeMap<String, SecretRef> = resolved
            .into_iter()
            .map(|secret| (secret.name.clone(), secret))
            .collect();

        let secrets = bindings
            .iter()
            .filter_map(|(variable, parameter)| {
                by_parameter
                    .get(parameter)
                    .map(|secret| (variable.clone(), secret.clone()))
            })
            .collect();

        Ok(ResolvedSecrets(secrets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticParameterStore;

    fn store() -> StaticParameterStore {
        StaticParameterStore::default()
            .with("github-personal-access-token", "ghp_abc123")
            .with("prod/database-url", "postgres://user:pw@db/app")
    }

    #[test]
    fn test_debug_and_display_are_redacted() {
        let secret = SecretRef::new("prod/database-url", "postgres://user:pw@db/app");

        let debug = format!("{:?}", secret);
        assert!(debug.contains("prod/database-url"));
        assert!(debug.contains(REDACTED));
        assert!(!debug.contains("pw@db"));

        assert_eq!(secret.to_string(), "parameter:prod/database-url");
    }

    #[test]
    fn test_serialization_is_redacted() {
        let secret = SecretRef::new("prod/database-url", "postgres://user:pw@db/app");
        let json = serde_json::to_string(&EnvValue::Secret(secret)).unwrap();

        assert!(json.contains("prod/database-url"));
        assert!(!json.contains("pw@db"));
    }

    #[test]
    fn test_sensitive_names() {
        assert!(is_sensitive_name("DATABASE_URL"));
        assert!(is_sensitive_name("stripe_api_key"));
        assert!(is_sensitive_name("RECAPTCHA_SECRET"));
        assert!(is_sensitive_name("GITHUB_TOKEN"));
        assert!(is_sensitive_name("SECRET_KEY_BASE"));
        assert!(is_sensitive_name("DATABASE_URL_REPLICA"));
        assert!(is_sensitive_name("db_password"));
        assert!(is_sensitive_name("aws.credentials"));
        assert!(!is_sensitive_name("RECAPTCHA_PUBLIC_KEY"));
        assert!(!is_sensitive_name("NODE_ENV"));
        assert!(!is_sensitive_name("PORT"));
    }

    #[test]
    fn test_sensitive_markers_match_whole_segments() {
        assert!(!is_sensitive_name("TOKENIZER_MODEL"));
        assert!(!is_sensitive_name("SECRETARY_EMAIL"));
        assert!(!is_sensitive_name("PASSWORDLESS_LOGIN"));
        assert!(!is_sensitive_name("KEY_API"));

        // Settings about a credential are not the credential.
        assert!(!is_sensitive_name("TOKEN_TTL_SECONDS"));
        assert!(!is_sensitive_name("SECRET_ROTATION_DAYS"));
        assert!(!is_sensitive_name("PASSWORD_MIN_LENGTH"));
        assert!(is_sensitive_name("TOKEN_SIGNING_SECRET"));
    }

    #[test]
    fn test_parameter_name_validation() {
        assert!(validate_parameter_name("prod/app.db-url_1").is_ok());
        assert!(validate_parameter_name("").is_err());
        assert!(validate_parameter_name("has space").is_err());
    }

    #[tokio::test]
    async fn test_resolve_existing_parameter() {
        let store = store();
        let resolver = SecretResolver::new(&store);

        let secret = resolver.resolve("github-personal-access-token").await.unwrap();
        assert_eq!(secret.name(), "github-personal-access-token");
        assert_eq!(secret.expose(), "ghp_abc123");

        // Idempotent within a run.
        let again = resolver.resolve("github-personal-access-token").await.unwrap();
        assert_eq!(secret, again);
    }

    #[tokio::test]
    async fn test_resolve_missing_parameter() {
        let store = store();
        let err = SecretResolver::new(&store)
            .resolve("does-not-exist")
            .await
            .unwrap_err();

        assert!(matches!(err, TopologyError::SecretNotFound { ref name } if name == "does-not-exist"));
    }

    #[tokio::test]
    async fn test_resolve_all_shares_parameters() {
        let store = store();
        let bindings = BTreeMap::from([
            ("DATABASE_URL".to_string(), "prod/database-url".to_string()),
            ("READ_REPLICA_URL".to_string(), "prod/database-url".to_string()),
        ]);

        let secrets = SecretResolver::new(&store)
            .resolve_all(&bindings)
            .await
            .unwrap();

        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets["DATABASE_URL"], secrets["READ_REPLICA_URL"]);
    }

    #[tokio::test]
    async fn test_resolve_all_fails_on_first_missing() {
        let store = store();
        let bindings = BTreeMap::from([
            ("DATABASE_URL".to_string(), "prod/database-url".to_string()),
            ("API_KEY".to_string(), "prod/missing".to_string()),
        ]);

        let err = SecretResolver::new(&store)
            .resolve_all(&bindings)
            .await
            .unwrap_err();

        assert!(err.is_secret_not_found());
    }
}
