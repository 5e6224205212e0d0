use kube::config::{AuthInfo, AuthProviderConfig, Kubeconfig, NamedAuthInfo, NamedCluster};
use secrecy::{ExposeSecret, SecretString};

use crate::error::ParseError;

/// A decoded kubeconfig. Decoding is purely structural: references between
/// contexts, clusters and users are checked by the normalizer.
pub type KubeconfigDocument = Kubeconfig;

/// Decode a kubeconfig from YAML (and therefore also JSON).
pub fn parse(raw: &str) -> Result<KubeconfigDocument, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    Kubeconfig::from_yaml(raw).map_err(|e| ParseError::Malformed(e.to_string()))
}

pub fn find_cluster<'a>(doc: &'a KubeconfigDocument, name: &str) -> Option<&'a NamedCluster> {
    doc.clusters.iter().find(|cluster| cluster.name == name)
}

pub fn find_user<'a>(doc: &'a KubeconfigDocument, name: &str) -> Option<&'a NamedAuthInfo> {
    doc.auth_infos.iter().find(|user| user.name == name)
}

/// True when the user carries a usable credential: a client certificate
/// with its key, a token, a username with its password, or an auth
/// provider block.
pub fn has_credential(user: &AuthInfo) -> bool {
    let set = |field: &Option<String>| field.as_deref().is_some_and(|value| !value.is_empty());
    let secret_set = |field: &Option<SecretString>| {
        field
            .as_ref()
            .is_some_and(|value| !value.expose_secret().is_empty())
    };

    (set(&user.client_certificate_data) && secret_set(&user.client_key_data))
        || secret_set(&user.token)
        || (set(&user.username) && secret_set(&user.password))
        || user.auth_provider.is_some()
}

pub fn secret_or_empty(value: &Option<SecretString>) -> String {
    value
        .as_ref()
        .map(|secret| secret.expose_secret().to_string())
        .unwrap_or_default()
}

/// One `auth-provider.config` entry, empty when absent.
pub fn provider_setting(provider: &AuthProviderConfig, key: &str) -> String {
    provider.config.get(key).cloned().unwrap_or_default()
}
