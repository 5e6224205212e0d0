use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::StoreError;
use crate::model::{
    AuthProviderKind, AwsCredentials, AwsSsoCredentials, AzureCredentials,
    DigitalOceanCredentials, GoogleCredentials, OidcCredentials, RancherCredentials,
};
use crate::store::{KeyValueStore, TEMPORARY_CREDENTIALS_KEY};

/// In-flight login state for one provider. Only the payload is persisted, so
/// the provider has to be named again when reading it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemporaryCredentials {
    Aws(AwsCredentials),
    AwsSso(AwsSsoCredentials),
    Azure(AzureCredentials),
    DigitalOcean(DigitalOceanCredentials),
    Google(GoogleCredentials),
    Rancher(RancherCredentials),
    Oidc(OidcCredentials),
}

impl TemporaryCredentials {
    pub fn kind(&self) -> AuthProviderKind {
        match self {
            Self::Aws(_) => AuthProviderKind::Aws,
            Self::AwsSso(_) => AuthProviderKind::AwsSso,
            Self::Azure(_) => AuthProviderKind::Azure,
            Self::DigitalOcean(_) => AuthProviderKind::DigitalOcean,
            Self::Google(_) => AuthProviderKind::Google,
            Self::Rancher(_) => AuthProviderKind::Rancher,
            Self::Oidc(_) => AuthProviderKind::Oidc,
        }
    }

    /// Decode a payload under the shape of `kind`. The payload's real shape is
    /// not checked; fields that do not match fall back to their defaults.
    pub fn decode(kind: AuthProviderKind, raw: &str) -> Result<Option<Self>, StoreError> {
        let credentials = match kind {
            AuthProviderKind::Aws => Self::Aws(decode(raw)?),
            AuthProviderKind::AwsSso => Self::AwsSso(decode(raw)?),
            AuthProviderKind::Azure => Self::Azure(decode(raw)?),
            AuthProviderKind::DigitalOcean => Self::DigitalOcean(decode(raw)?),
            AuthProviderKind::Google => Self::Google(decode(raw)?),
            AuthProviderKind::Rancher => Self::Rancher(decode(raw)?),
            AuthProviderKind::Oidc => Self::Oidc(decode(raw)?),
            AuthProviderKind::Kubeconfig => return Ok(None),
        };
        Ok(Some(credentials))
    }

    pub fn encode(&self) -> Result<String, StoreError> {
        match self {
            Self::Aws(payload) => encode(payload),
            Self::AwsSso(payload) => encode(payload),
            Self::Azure(payload) => encode(payload),
            Self::DigitalOcean(payload) => encode(payload),
            Self::Google(payload) => encode(payload),
            Self::Rancher(payload) => encode(payload),
            Self::Oidc(payload) => encode(payload),
        }
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode {
        key: TEMPORARY_CREDENTIALS_KEY.to_string(),
        message: e.to_string(),
    })
}

fn encode<T: Serialize>(payload: &T) -> Result<String, StoreError> {
    serde_json::to_string(payload).map_err(|e| StoreError::Encode {
        key: TEMPORARY_CREDENTIALS_KEY.to_string(),
        message: e.to_string(),
    })
}

/// Replace whatever login state is stored with `credentials`.
pub fn save_temporary_credentials<S: KeyValueStore + ?Sized>(
    store: &S,
    credentials: &TemporaryCredentials,
) -> Result<(), StoreError> {
    store.set(TEMPORARY_CREDENTIALS_KEY, &credentials.encode()?)?;
    debug!("stored temporary {} credentials", credentials.kind());
    Ok(())
}

pub fn read_temporary_credentials<S: KeyValueStore + ?Sized>(
    store: &S,
    kind: AuthProviderKind,
) -> Result<Option<TemporaryCredentials>, StoreError> {
    match store.get(TEMPORARY_CREDENTIALS_KEY)? {
        Some(raw) => TemporaryCredentials::decode(kind, &raw),
        None => Ok(None),
    }
}

pub fn remove_temporary_credentials<S: KeyValueStore + ?Sized>(
    store: &S,
) -> Result<(), StoreError> {
    store.remove(TEMPORARY_CREDENTIALS_KEY)
}

#[cfg(test)]
mod tests {
    use super::{
        TemporaryCredentials, read_temporary_credentials, remove_temporary_credentials,
        save_temporary_credentials,
    };
    use crate::model::{
        AuthProviderKind, AwsCredentials, DigitalOceanCredentials, RancherCredentials,
    };
    use crate::store::{KeyValueStore, MemoryStore};

    fn rancher() -> TemporaryCredentials {
        TemporaryCredentials::Rancher(RancherCredentials {
            rancher_url: "https://rancher.example.com".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            bearer_token: String::new(),
            expires: 0,
        })
    }

    #[test]
    fn nothing_stored_reads_none() {
        let store = MemoryStore::new();
        assert_eq!(
            read_temporary_credentials(&store, AuthProviderKind::Rancher).unwrap(),
            None
        );
    }

    #[test]
    fn save_then_read_with_matching_kind() {
        let store = MemoryStore::new();
        save_temporary_credentials(&store, &rancher()).unwrap();

        let raw = store.get("temporary_credentials").unwrap().unwrap();
        assert!(raw.contains("\"rancherUrl\""));

        let read = read_temporary_credentials(&store, AuthProviderKind::Rancher).unwrap();
        assert_eq!(read, Some(rancher()));
    }

    #[test]
    fn save_overwrites_previous_login() {
        let store = MemoryStore::new();
        save_temporary_credentials(&store, &rancher()).unwrap();
        let digitalocean = TemporaryCredentials::DigitalOcean(DigitalOceanCredentials {
            token: "dop_v1".to_string(),
            cluster_id: String::new(),
        });
        save_temporary_credentials(&store, &digitalocean).unwrap();

        assert_eq!(
            read_temporary_credentials(&store, AuthProviderKind::DigitalOcean).unwrap(),
            Some(digitalocean)
        );
    }

    #[test]
    fn reading_with_wrong_kind_yields_mismatched_fields() {
        let store = MemoryStore::new();
        save_temporary_credentials(&store, &rancher()).unwrap();

        let read = read_temporary_credentials(&store, AuthProviderKind::Aws).unwrap();
        assert_eq!(read, Some(TemporaryCredentials::Aws(AwsCredentials::default())));
    }

    #[test]
    fn kubeconfig_has_no_temporary_credentials() {
        let store = MemoryStore::new();
        save_temporary_credentials(&store, &rancher()).unwrap();
        assert_eq!(
            read_temporary_credentials(&store, AuthProviderKind::Kubeconfig).unwrap(),
            None
        );
    }

    #[test]
    fn clear_removes_blob() {
        let store = MemoryStore::new();
        save_temporary_credentials(&store, &rancher()).unwrap();
        remove_temporary_credentials(&store).unwrap();
        assert_eq!(store.get("temporary_credentials").unwrap(), None);
    }

    #[test]
    fn legacy_rancher_host_shape_is_readable() {
        let store = MemoryStore::with_entries([(
            "temporary_credentials",
            r#"{"rancherHost":"rancher.local","rancherPort":443,"secure":true,"username":"u","password":"p","bearerToken":"","expires":0}"#,
        )]);
        let Some(TemporaryCredentials::Rancher(credentials)) =
            read_temporary_credentials(&store, AuthProviderKind::Rancher).unwrap()
        else {
            panic!("expected rancher credentials");
        };
        assert_eq!(credentials.rancher_url, "https://rancher.local:443");
        assert_eq!(credentials.username, "u");
    }
}
