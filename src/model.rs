use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::StoreError;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Clusters keyed by id.
pub type ClusterCollection = BTreeMap<String, Cluster>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum AuthProviderKind {
    Kubeconfig,
    Aws,
    AwsSso,
    Azure,
    DigitalOcean,
    Google,
    Rancher,
    Oidc,
}

impl AuthProviderKind {
    pub const ALL: [Self; 8] = [
        Self::Kubeconfig,
        Self::Aws,
        Self::AwsSso,
        Self::Azure,
        Self::DigitalOcean,
        Self::Google,
        Self::Rancher,
        Self::Oidc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kubeconfig => "kubeconfig",
            Self::Aws => "aws",
            Self::AwsSso => "awssso",
            Self::Azure => "azure",
            Self::DigitalOcean => "digitalocean",
            Self::Google => "google",
            Self::Rancher => "rancher",
            Self::Oidc => "oidc",
        }
    }

    /// Exact match against the persisted tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Lenient match used for user input.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "kubeconfig" | "kc" => Some(Self::Kubeconfig),
            "aws" | "eks" => Some(Self::Aws),
            "awssso" | "aws-sso" | "sso" => Some(Self::AwsSso),
            "azure" | "aks" => Some(Self::Azure),
            "digitalocean" | "do" | "doks" => Some(Self::DigitalOcean),
            "google" | "gke" | "gcp" => Some(Self::Google),
            "rancher" | "rke" => Some(Self::Rancher),
            "oidc" => Some(Self::Oidc),
            _ => None,
        }
    }
}

impl Display for AuthProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| format!("unknown auth provider '{s}'"))
    }
}

/// Epoch seconds as written by older clients, which may store fractional
/// numbers or `null`. Fractions are truncated.
fn epoch_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Epoch {
        Whole(i64),
        Fractional(f64),
        Null(()),
    }

    Ok(match Epoch::deserialize(deserializer)? {
        Epoch::Whole(seconds) => seconds,
        Epoch::Fractional(seconds) => seconds.trunc() as i64,
        Epoch::Null(()) => 0,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsCredentials {
    #[serde(rename = "accessKeyID")]
    pub access_key_id: String,
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    pub region: String,
    #[serde(rename = "secretKey")]
    pub secret_key: String,
    #[serde(rename = "sessionToken", skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AwsSsoCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    #[serde(deserialize_with = "epoch_seconds")]
    pub expire: i64,
    pub region: String,
    pub sso_region: String,
    #[serde(rename = "startURL")]
    pub start_url: String,
    #[serde(rename = "accountID")]
    pub account_id: String,
    pub role_name: String,
    pub access_token: String,
    #[serde(deserialize_with = "epoch_seconds")]
    pub access_token_expire: i64,
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AzureCredentials {
    pub admin: bool,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_secret: String,
    pub resource_group_name: String,
    #[serde(rename = "subscriptionID")]
    pub subscription_id: String,
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitalOceanCredentials {
    pub token: String,
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoogleCredentials {
    pub access_token: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(deserialize_with = "epoch_seconds")]
    pub expires: i64,
    pub id_token: String,
    pub refresh_token: String,
    pub token_type: String,
    #[serde(rename = "clusterID", skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

/// Rancher login state in its single-URL form. Older shapes that carried
/// `rancherHost`/`rancherPort`/`secure` are folded into `rancher_url` on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RancherCredentialsRecord", rename_all = "camelCase")]
pub struct RancherCredentials {
    pub rancher_url: String,
    pub username: String,
    pub password: String,
    pub bearer_token: String,
    pub expires: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RancherCredentialsRecord {
    rancher_url: String,
    rancher_host: String,
    rancher_port: Option<serde_json::Value>,
    secure: Option<bool>,
    username: String,
    password: String,
    bearer_token: String,
    #[serde(deserialize_with = "epoch_seconds")]
    expires: i64,
}

impl From<RancherCredentialsRecord> for RancherCredentials {
    fn from(record: RancherCredentialsRecord) -> Self {
        let rancher_url = if record.rancher_url.is_empty() && !record.rancher_host.is_empty() {
            let secure = record.secure.unwrap_or(true);
            let port = record
                .rancher_port
                .as_ref()
                .and_then(|port| match port {
                    serde_json::Value::Number(n) => n.as_u64(),
                    serde_json::Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                })
                .unwrap_or(if secure { 443 } else { 80 });
            let scheme = if secure { "https" } else { "http" };
            format!("{scheme}://{}:{port}", record.rancher_host)
        } else {
            record.rancher_url
        };

        Self {
            rancher_url,
            username: record.username,
            password: record.password,
            bearer_token: record.bearer_token,
            expires: record.expires,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OidcCredentials {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<String>,
    pub id_token: String,
    #[serde(rename = "idpIssuerURL")]
    pub idp_issuer_url: String,
    pub refresh_token: String,
    pub certificate_authority: String,
    pub access_token: String,
    #[serde(deserialize_with = "epoch_seconds")]
    pub expiry: i64,
    #[serde(rename = "clusterID", skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

/// How a cluster authenticates, together with the provider payload for that
/// mode. The payload is `None` while a cluster is only known from a provider
/// listing or when legacy credentials could not be recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProvider {
    Kubeconfig,
    Aws(Option<AwsCredentials>),
    AwsSso(Option<AwsSsoCredentials>),
    Azure(Option<AzureCredentials>),
    DigitalOcean(Option<DigitalOceanCredentials>),
    Google(Option<GoogleCredentials>),
    Rancher(Option<RancherCredentials>),
    Oidc(Option<OidcCredentials>),
}

impl AuthProvider {
    pub fn unresolved(kind: AuthProviderKind) -> Self {
        match kind {
            AuthProviderKind::Kubeconfig => Self::Kubeconfig,
            AuthProviderKind::Aws => Self::Aws(None),
            AuthProviderKind::AwsSso => Self::AwsSso(None),
            AuthProviderKind::Azure => Self::Azure(None),
            AuthProviderKind::DigitalOcean => Self::DigitalOcean(None),
            AuthProviderKind::Google => Self::Google(None),
            AuthProviderKind::Rancher => Self::Rancher(None),
            AuthProviderKind::Oidc => Self::Oidc(None),
        }
    }

    pub fn kind(&self) -> AuthProviderKind {
        match self {
            Self::Kubeconfig => AuthProviderKind::Kubeconfig,
            Self::Aws(_) => AuthProviderKind::Aws,
            Self::AwsSso(_) => AuthProviderKind::AwsSso,
            Self::Azure(_) => AuthProviderKind::Azure,
            Self::DigitalOcean(_) => AuthProviderKind::DigitalOcean,
            Self::Google(_) => AuthProviderKind::Google,
            Self::Rancher(_) => AuthProviderKind::Rancher,
            Self::Oidc(_) => AuthProviderKind::Oidc,
        }
    }

    pub fn has_credentials(&self) -> bool {
        match self {
            Self::Kubeconfig => true,
            Self::Aws(payload) => payload.is_some(),
            Self::AwsSso(payload) => payload.is_some(),
            Self::Azure(payload) => payload.is_some(),
            Self::DigitalOcean(payload) => payload.is_some(),
            Self::Google(payload) => payload.is_some(),
            Self::Rancher(payload) => payload.is_some(),
            Self::Oidc(payload) => payload.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClusterRecord", into = "ClusterRecord")]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub url: String,
    pub certificate_authority_data: String,
    pub client_certificate_data: String,
    pub client_key_data: String,
    pub token: String,
    pub username: String,
    pub password: String,
    pub insecure_skip_tls_verify: bool,
    pub auth_provider: AuthProvider,
    pub namespace: String,
}

impl Cluster {
    /// A cluster with every credential field empty and the default namespace.
    pub fn new(name: impl Into<String>, auth_provider: AuthProvider) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            url: String::new(),
            certificate_authority_data: String::new(),
            client_certificate_data: String::new(),
            client_key_data: String::new(),
            token: String::new(),
            username: String::new(),
            password: String::new(),
            insecure_skip_tls_verify: false,
            auth_provider,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// The persisted shape of a cluster: a free-form `authProvider` tag and one
/// optional field per provider payload. Legacy tags (`""`, `oidc__<name>`)
/// only ever exist at this level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "certificateAuthorityData")]
    pub certificate_authority_data: String,
    #[serde(rename = "clientCertificateData")]
    pub client_certificate_data: String,
    #[serde(rename = "clientKeyData")]
    pub client_key_data: String,
    pub token: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "insecureSkipTLSVerify")]
    pub insecure_skip_tls_verify: bool,
    #[serde(rename = "authProvider")]
    pub auth_provider: String,
    #[serde(rename = "authProviderAWS", skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsCredentials>,
    #[serde(rename = "authProviderAWSSSO", skip_serializing_if = "Option::is_none")]
    pub aws_sso: Option<AwsSsoCredentials>,
    #[serde(rename = "authProviderAzure", skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureCredentials>,
    #[serde(
        rename = "authProviderDigitalOcean",
        skip_serializing_if = "Option::is_none"
    )]
    pub digital_ocean: Option<DigitalOceanCredentials>,
    #[serde(rename = "authProviderGoogle", skip_serializing_if = "Option::is_none")]
    pub google: Option<GoogleCredentials>,
    #[serde(rename = "authProviderRancher", skip_serializing_if = "Option::is_none")]
    pub rancher: Option<RancherCredentials>,
    #[serde(rename = "authProviderOIDC", skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcCredentials>,
    pub namespace: String,
}

impl Default for ClusterRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            url: String::new(),
            certificate_authority_data: String::new(),
            client_certificate_data: String::new(),
            client_key_data: String::new(),
            token: String::new(),
            username: String::new(),
            password: String::new(),
            insecure_skip_tls_verify: false,
            auth_provider: String::new(),
            aws: None,
            aws_sso: None,
            azure: None,
            digital_ocean: None,
            google: None,
            rancher: None,
            oidc: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl From<Cluster> for ClusterRecord {
    fn from(cluster: Cluster) -> Self {
        let mut record = Self {
            id: cluster.id,
            name: cluster.name,
            url: cluster.url,
            certificate_authority_data: cluster.certificate_authority_data,
            client_certificate_data: cluster.client_certificate_data,
            client_key_data: cluster.client_key_data,
            token: cluster.token,
            username: cluster.username,
            password: cluster.password,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            auth_provider: cluster.auth_provider.kind().as_str().to_string(),
            namespace: cluster.namespace,
            ..Self::default()
        };
        match cluster.auth_provider {
            AuthProvider::Kubeconfig => {}
            AuthProvider::Aws(payload) => record.aws = payload,
            AuthProvider::AwsSso(payload) => record.aws_sso = payload,
            AuthProvider::Azure(payload) => record.azure = payload,
            AuthProvider::DigitalOcean(payload) => record.digital_ocean = payload,
            AuthProvider::Google(payload) => record.google = payload,
            AuthProvider::Rancher(payload) => record.rancher = payload,
            AuthProvider::Oidc(payload) => record.oidc = payload,
        }
        record
    }
}

impl TryFrom<ClusterRecord> for Cluster {
    type Error = StoreError;

    fn try_from(record: ClusterRecord) -> Result<Self, Self::Error> {
        let Some(kind) = AuthProviderKind::from_tag(&record.auth_provider) else {
            return Err(StoreError::UnknownAuthProvider {
                id: record.id,
                tag: record.auth_provider,
            });
        };

        let auth_provider = match kind {
            AuthProviderKind::Kubeconfig => AuthProvider::Kubeconfig,
            AuthProviderKind::Aws => AuthProvider::Aws(record.aws),
            AuthProviderKind::AwsSso => AuthProvider::AwsSso(record.aws_sso),
            AuthProviderKind::Azure => AuthProvider::Azure(record.azure),
            AuthProviderKind::DigitalOcean => AuthProvider::DigitalOcean(record.digital_ocean),
            AuthProviderKind::Google => AuthProvider::Google(record.google),
            AuthProviderKind::Rancher => AuthProvider::Rancher(record.rancher),
            AuthProviderKind::Oidc => AuthProvider::Oidc(record.oidc),
        };

        Ok(Self {
            id: record.id,
            name: record.name,
            url: record.url,
            certificate_authority_data: record.certificate_authority_data,
            client_certificate_data: record.client_certificate_data,
            client_key_data: record.client_key_data,
            token: record.token,
            username: record.username,
            password: record.password,
            insecure_skip_tls_verify: record.insecure_skip_tls_verify,
            auth_provider,
            namespace: record.namespace,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bookmark {
    pub title: String,
    pub url: String,
    pub namespace: String,
}
