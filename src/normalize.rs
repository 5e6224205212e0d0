use std::fmt::Display;
use std::future::Future;

use chrono::Utc;
use futures::future::try_join_all;
use kube::config::AuthProviderConfig;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{ImportError, ParseError, ValidationError};
use crate::kubeconfig::{self, KubeconfigDocument};
use crate::model::{AuthProvider, AuthProviderKind, Cluster, OidcCredentials, RancherCredentials};

const OIDC_PROVIDER: &str = "oidc";

/// Map every context of `doc` to a cluster, in document order.
///
/// The first invalid context rejects the whole document; no partial result
/// is ever returned.
pub fn from_kubeconfig(doc: &KubeconfigDocument) -> Result<Vec<Cluster>, ValidationError> {
    from_kubeconfig_at(doc, Utc::now().timestamp())
}

/// Same as [`from_kubeconfig`] with an explicit clock, `now` in epoch seconds.
pub fn from_kubeconfig_at(
    doc: &KubeconfigDocument,
    now: i64,
) -> Result<Vec<Cluster>, ValidationError> {
    let mut clusters = Vec::with_capacity(doc.contexts.len());

    for (index, named) in doc.contexts.iter().enumerate() {
        if named.name.is_empty() {
            return Err(ValidationError::EmptyContextName(index));
        }
        let (cluster_name, user_name) = named
            .context
            .as_ref()
            .map(|context| {
                (
                    context.cluster.as_str(),
                    context.user.as_deref().unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        let Some(cluster_ref) = kubeconfig::find_cluster(doc, cluster_name) else {
            return Err(ValidationError::UnknownCluster {
                context: named.name.clone(),
                cluster: cluster_name.to_string(),
            });
        };
        let Some(user_ref) = kubeconfig::find_user(doc, user_name) else {
            return Err(ValidationError::UnknownUser {
                context: named.name.clone(),
                user: user_name.to_string(),
            });
        };
        let entry = cluster_ref.cluster.as_ref();
        let Some(server) = entry
            .and_then(|entry| entry.server.as_deref())
            .filter(|server| !server.is_empty())
        else {
            return Err(ValidationError::MissingServer(named.name.clone()));
        };
        let Some(user) = user_ref
            .auth_info
            .as_ref()
            .filter(|user| kubeconfig::has_credential(user))
        else {
            return Err(ValidationError::MissingCredential(named.name.clone()));
        };

        let mut cluster = match &user.auth_provider {
            Some(provider) if provider.name == OIDC_PROVIDER => Cluster::new(
                named.name.clone(),
                AuthProvider::Oidc(Some(oidc_credentials(provider, now))),
            ),
            Some(provider) => {
                return Err(ValidationError::UnsupportedAuthProvider {
                    context: named.name.clone(),
                    provider: provider.name.clone(),
                });
            }
            None => {
                let mut cluster = Cluster::new(named.name.clone(), AuthProvider::Kubeconfig);
                cluster.client_certificate_data = or_empty(&user.client_certificate_data);
                cluster.client_key_data = kubeconfig::secret_or_empty(&user.client_key_data);
                cluster.token = kubeconfig::secret_or_empty(&user.token);
                cluster.username = or_empty(&user.username);
                cluster.password = kubeconfig::secret_or_empty(&user.password);
                cluster
            }
        };
        cluster.url = server.to_string();
        cluster.certificate_authority_data = entry
            .and_then(|entry| entry.certificate_authority_data.clone())
            .unwrap_or_default();
        cluster.insecure_skip_tls_verify = entry
            .and_then(|entry| entry.insecure_skip_tls_verify)
            .unwrap_or(false);

        clusters.push(cluster);
    }

    Ok(clusters)
}

/// Parse and normalize a raw kubeconfig in one step.
pub fn clusters_from_kubeconfig(raw: &str) -> Result<Vec<Cluster>, ImportError> {
    let doc = kubeconfig::parse(raw)?;
    Ok(from_kubeconfig(&doc)?)
}

fn oidc_credentials(provider: &AuthProviderConfig, now: i64) -> OidcCredentials {
    let setting = |key: &str| kubeconfig::provider_setting(provider, key);
    OidcCredentials {
        client_id: setting("client-id"),
        client_secret: setting("client-secret"),
        scopes: None,
        id_token: setting("id-token"),
        idp_issuer_url: setting("idp-issuer-url"),
        refresh_token: setting("refresh-token"),
        certificate_authority: setting("idp-certificate-authority-data"),
        access_token: String::new(),
        // Marks the token as stale so it is refreshed before first use.
        expiry: now,
        cluster_id: None,
    }
}

fn or_empty(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RancherClusterList {
    pub data: Vec<RancherClusterSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RancherClusterSummary {
    pub id: String,
    pub name: String,
}

/// Rancher's `generateKubeconfig` action result.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeneratedKubeconfig {
    pub config: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DigitalOceanCluster {
    pub id: String,
    pub name: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DigitalOceanListing {
    Wrapped {
        kubernetes_clusters: Vec<DigitalOceanCluster>,
    },
    Bare(Vec<DigitalOceanCluster>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoogleCluster {
    pub name: String,
    pub location: String,
    pub endpoint: String,
    pub master_auth: GoogleMasterAuth,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoogleMasterAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    pub cluster_ca_certificate: String,
    pub client_certificate: Option<String>,
    pub client_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AwsCluster {
    pub name: String,
    pub endpoint: String,
    pub certificate_authority: AwsCertificateAuthority,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AwsCertificateAuthority {
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AzureCluster {
    pub name: String,
    pub kubeconfig: Value,
}

/// A provider cluster listing decoded into the provider's own shape.
#[derive(Debug, Clone)]
pub enum ProviderListing {
    Rancher(Vec<RancherClusterSummary>),
    DigitalOcean(Vec<DigitalOceanCluster>),
    Google(Vec<GoogleCluster>),
    Aws(Vec<AwsCluster>),
    Azure(Vec<AzureCluster>),
}

impl ProviderListing {
    pub fn decode(provider: AuthProviderKind, payload: Value) -> Result<Self, ImportError> {
        let malformed = |e: serde_json::Error| {
            ImportError::Parse(ParseError::Malformed(format!(
                "{provider} cluster listing: {e}"
            )))
        };

        let listing = match provider {
            AuthProviderKind::Rancher => {
                let list: RancherClusterList = serde_json::from_value(payload).map_err(malformed)?;
                Self::Rancher(list.data)
            }
            AuthProviderKind::DigitalOcean => {
                let list: DigitalOceanListing =
                    serde_json::from_value(payload).map_err(malformed)?;
                match list {
                    DigitalOceanListing::Wrapped {
                        kubernetes_clusters,
                    } => Self::DigitalOcean(kubernetes_clusters),
                    DigitalOceanListing::Bare(clusters) => Self::DigitalOcean(clusters),
                }
            }
            AuthProviderKind::Google => {
                Self::Google(serde_json::from_value(payload).map_err(malformed)?)
            }
            AuthProviderKind::Aws | AuthProviderKind::AwsSso => {
                Self::Aws(serde_json::from_value(payload).map_err(malformed)?)
            }
            AuthProviderKind::Azure => {
                Self::Azure(serde_json::from_value(payload).map_err(malformed)?)
            }
            AuthProviderKind::Kubeconfig | AuthProviderKind::Oidc => {
                return Err(ValidationError::NotAProvider(provider.to_string()).into());
            }
        };
        Ok(listing)
    }

    /// `(id, name)` pairs in listing order.
    pub fn entries(&self) -> Vec<(String, String)> {
        match self {
            Self::Rancher(clusters) => clusters
                .iter()
                .map(|c| (c.id.clone(), c.name.clone()))
                .collect(),
            Self::DigitalOcean(clusters) => clusters
                .iter()
                .map(|c| (c.id.clone(), c.name.clone()))
                .collect(),
            Self::Google(clusters) => clusters
                .iter()
                .map(|c| (format!("{}_{}", c.location, c.name), c.name.clone()))
                .collect(),
            Self::Aws(clusters) => clusters
                .iter()
                .map(|c| (c.name.clone(), c.name.clone()))
                .collect(),
            Self::Azure(clusters) => clusters
                .iter()
                .map(|c| (c.name.clone(), c.name.clone()))
                .collect(),
        }
    }
}

/// Map a provider listing to selectable clusters. Only `id`, `name` and the
/// provider tag are set; credentials are attached once the user has picked
/// the clusters to import.
pub fn from_provider_response(
    provider: AuthProviderKind,
    payload: Value,
) -> Result<Vec<Cluster>, ImportError> {
    let listing = ProviderListing::decode(provider, payload)?;
    Ok(listing
        .entries()
        .into_iter()
        .map(|(id, name)| {
            let mut cluster = Cluster::new(name, AuthProvider::unresolved(provider));
            cluster.id = id;
            cluster
        })
        .collect())
}

/// Turn selected Rancher clusters into importable ones.
///
/// `fetch` retrieves the generated kubeconfig of one Rancher cluster id. All
/// fetches run concurrently; any failing fetch, parse or validation rejects
/// the whole selection.
pub async fn finalize_rancher<F, Fut, E>(
    credentials: &RancherCredentials,
    selected: &[Cluster],
    fetch: F,
) -> Result<Vec<Cluster>, ImportError>
where
    F: Fn(RancherCredentials, String) -> Fut,
    Fut: Future<Output = Result<GeneratedKubeconfig, E>>,
    E: Display,
{
    let fetches = selected.iter().map(|cluster| {
        let id = cluster.id.clone();
        let pending = fetch(credentials.clone(), id.clone());
        async move {
            pending.await.map_err(|e| ImportError::Fetch {
                cluster: id,
                message: e.to_string(),
            })
        }
    });
    let generated = try_join_all(fetches).await?;

    let mut clusters = Vec::new();
    for (selection, generated) in selected.iter().zip(generated) {
        let doc = kubeconfig::parse(&generated.config)?;
        let normalized = from_kubeconfig(&doc)?;
        debug!(
            "rancher cluster {} produced {} context(s)",
            selection.id,
            normalized.len()
        );
        clusters.extend(normalized.into_iter().map(|mut cluster| {
            cluster.auth_provider = AuthProvider::Rancher(Some(credentials.clone()));
            cluster
        }));
    }
    Ok(clusters)
}
