//! Persistent cluster storage for a Kubernetes navigator: kubeconfig and
//! provider imports, the versioned cluster collection with its one-shot
//! legacy migration, temporary provider credentials and app settings.

pub mod credentials;
pub mod error;
pub mod kubeconfig;
pub mod migrate;
pub mod model;
pub mod normalize;
pub mod repository;
pub mod settings;
pub mod store;

pub use credentials::{
    TemporaryCredentials, read_temporary_credentials, remove_temporary_credentials,
    save_temporary_credentials,
};
pub use error::{ImportError, MigrationError, ParseError, StoreError, ValidationError};
pub use migrate::{MigrationOutcome, MigrationReport, MigrationState, migrate};
pub use model::{
    AuthProvider, AuthProviderKind, Bookmark, Cluster, ClusterCollection, ClusterRecord,
    RancherCredentials,
};
pub use normalize::{
    GeneratedKubeconfig, ProviderListing, clusters_from_kubeconfig, finalize_rancher,
    from_kubeconfig, from_provider_response,
};
pub use repository::ClusterRepository;
pub use settings::{AppSettings, Theme};
pub use store::{FileStore, KeyValueStore, MemoryStore};
