use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Backend(String),

    #[error("failed to decode stored {key}: {message}")]
    Decode { key: String, message: String },

    #[error("failed to encode {key}: {message}")]
    Encode { key: String, message: String },

    #[error("cluster '{id}' has unknown auth provider '{tag}'")]
    UnknownAuthProvider { id: String, tag: String },

    #[error("cluster '{0}' was not found")]
    ClusterNotFound(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("kubeconfig is required")]
    Empty,

    #[error("kubeconfig is not valid YAML or JSON: {0}")]
    Malformed(String),
}

/// Semantic problems in a structurally valid kubeconfig. Every variant names
/// the context that was being normalized when the problem was found.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("context at position {0} has an empty name")]
    EmptyContextName(usize),

    #[error("context '{context}' references unknown cluster '{cluster}'")]
    UnknownCluster { context: String, cluster: String },

    #[error("context '{context}' references unknown user '{user}'")]
    UnknownUser { context: String, user: String },

    #[error("cluster of context '{0}' has no server")]
    MissingServer(String),

    #[error("user of context '{0}' has no usable credential")]
    MissingCredential(String),

    #[error("context '{context}' uses unsupported auth provider '{provider}'")]
    UnsupportedAuthProvider { context: String, provider: String },

    #[error("'{0}' is not a cluster provider")]
    NotAProvider(String),
}

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("legacy {key} credentials are malformed: {message}")]
    MalformedLegacyBlob { key: String, message: String },

    #[error("stored clusters are malformed: {0}")]
    MalformedClusters(String),

    #[error("storage error during migration: {0}")]
    Store(String),
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to fetch kubeconfig for cluster '{cluster}': {message}")]
    Fetch { cluster: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::{ImportError, MigrationError, ParseError, StoreError, ValidationError};

    #[test]
    fn validation_errors_name_the_context() {
        let err = ValidationError::UnknownUser {
            context: "prod".to_string(),
            user: "admin".to_string(),
        };
        assert_eq!(err.to_string(), "context 'prod' references unknown user 'admin'");
    }

    #[test]
    fn migration_error_surfaces_through_store_error() {
        let err: StoreError = MigrationError::MalformedLegacyBlob {
            key: "aws".to_string(),
            message: "expected value".to_string(),
        }
        .into();
        assert!(matches!(err, StoreError::Migration(_)));
        assert!(err.to_string().contains("legacy aws credentials"));
    }

    #[test]
    fn import_error_is_transparent_over_parse_error() {
        let err: ImportError = ParseError::Empty.into();
        assert_eq!(err.to_string(), "kubeconfig is required");
    }
}
