//! Error taxonomy for topology assembly.

use thiserror::Error;

use crate::{
    assembler::AssemblyStage,
    locator::{LookupKey, ResourceKind},
};

/// Result type alias for topology operations.
pub type Result<T, E = TopologyError> = std::result::Result<T, E>;

/// Errors raised while composing a deployment topology.
///
/// Every variant is fatal to the current assembly run.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The named parameter does not exist in the parameter store.
    #[error("secret parameter not found: {name}")]
    SecretNotFound { name: String },

    /// The parameter store could not be read.
    #[error("failed to read parameter {name}: {message}")]
    StoreAccess { name: String, message: String },

    /// A lookup against the infrastructure inventory matched nothing.
    #[error("{kind} not found ({key})")]
    ResourceNotFound { kind: ResourceKind, key: LookupKey },

    /// A lookup matched more than one resource.
    #[error("{kind} lookup ({key}) is ambiguous: {matches} matches")]
    AmbiguousResource {
        kind: ResourceKind,
        key: LookupKey,
        matches: usize,
    },

    /// The infrastructure inventory could not be queried.
    #[error("failed to query {kind} ({key}): {message}")]
    InventoryAccess {
        kind: ResourceKind,
        key: LookupKey,
        message: String,
    },

    /// A locally validated value is outside what the backend accepts.
    #[error("invalid {field}: {reason}")]
    InvalidSpec { field: String, reason: String },

    /// Assembly stopped at `stage` because of `source`.
    #[error("assembly aborted during {stage} stage: {source}")]
    AssemblyAborted {
        stage: AssemblyStage,
        #[source]
        source: Box<TopologyError>,
    },
}

impl TopologyError {
    /// Create an [`TopologyError::InvalidSpec`] error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wrap this error as the failure that aborted `stage`.
    ///
    /// Errors that are already wrapped keep their original stage.
    pub fn aborted(self, stage: AssemblyStage) -> Self {
        match self {
            Self::AssemblyAborted { .. } => self,
            other => Self::AssemblyAborted {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The underlying failure, looking through [`TopologyError::AssemblyAborted`].
    pub fn root(&self) -> &TopologyError {
        match self {
            Self::AssemblyAborted { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage that aborted assembly, if this error came out of the assembler.
    pub fn stage(&self) -> Option<AssemblyStage> {
        match self {
            Self::AssemblyAborted { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_secret_not_found(&self) -> bool {
        matches!(self.root(), Self::SecretNotFound { .. })
    }

    pub fn is_invalid_spec(&self) -> bool {
        matches!(self.root(), Self::InvalidSpec { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_wraps_once() {
        let err = TopologyError::SecretNotFound {
            name: "db-url".to_string(),
        }
        .aborted(AssemblyStage::Resolve)
        .aborted(AssemblyStage::Compose);

        assert_eq!(err.stage(), Some(AssemblyStage::Resolve));
        assert!(err.is_secret_not_found());
        assert!(err.to_string().contains("resolve"));
        assert!(err.to_string().contains("db-url"));
    }

    #[test]
    fn test_root_of_plain_error_is_itself() {
        let err = TopologyError::invalid("priority", "must be positive");
        assert!(err.is_invalid_spec());
        assert_eq!(err.stage(), None);
        assert_eq!(err.to_string(), "invalid priority: must be positive");
    }
}
