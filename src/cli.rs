use clap::{Parser, Subcommand};
use kubenav_store::AuthProviderKind;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "kubenav-store",
    version,
    about = "Manage the cluster storage of a Kubernetes navigator."
)]
pub struct CliArgs {
    /// Storage file (defaults to the runtime config, then ~/.config/kubenav/storage.json)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long)]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Import every context of a kubeconfig file ("-" reads stdin)
    Import { file: String },

    /// List stored clusters, marking the active one
    List,

    /// Make a cluster the active one
    Use { id: String },

    /// Delete a stored cluster
    Remove { id: String },

    /// Change the namespace of a stored cluster
    Namespace { id: String, namespace: String },

    /// Upgrade legacy storage now instead of on first read
    Migrate,

    /// Print the effective settings as JSON
    Settings,

    /// Manage the login state of an in-progress provider import
    Credentials {
        #[command(subcommand)]
        action: CredentialsCommand,
    },

    /// Print the clusters contained in a provider listing response
    ProviderList {
        provider: AuthProviderKind,
        file: PathBuf,
    },

    /// Import Rancher clusters from generated kubeconfig documents
    RancherImport {
        /// Rancher cluster listing response
        listing: PathBuf,

        /// Directory holding one `<id>.json` generated kubeconfig per cluster
        dir: PathBuf,

        /// Only import these cluster ids (defaults to the whole listing)
        #[arg(long = "id")]
        ids: Vec<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum CredentialsCommand {
    /// Store provider credentials given as JSON
    Save {
        provider: AuthProviderKind,
        json: String,
    },

    /// Print the stored credentials read as the given provider
    Show { provider: AuthProviderKind },

    /// Forget the stored credentials
    Clear,
}
