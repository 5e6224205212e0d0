use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{MigrationError, StoreError};
use crate::model::{
    AuthProviderKind, AwsCredentials, AzureCredentials, ClusterRecord, GoogleCredentials,
    OidcCredentials, RancherCredentials,
};
use crate::store::{CLUSTERS_KEY, KeyValueStore, MIGRATED_KEY};

pub const LEGACY_AWS_KEY: &str = "aws";
pub const LEGACY_AZURE_KEY: &str = "azure";
pub const LEGACY_GOOGLE_KEY: &str = "google";
pub const LEGACY_GOOGLE_CLIENT_ID_KEY: &str = "google_clientid";
pub const LEGACY_RANCHER_KEY: &str = "rancher";
pub const LEGACY_OIDC_KEY: &str = "oidc";
pub const LEGACY_OIDC_LAST_KEY: &str = "oidc_last";

/// Every key the migrator deletes once a pass completes.
pub const LEGACY_KEYS: [&str; 7] = [
    LEGACY_AWS_KEY,
    LEGACY_AZURE_KEY,
    LEGACY_GOOGLE_CLIENT_ID_KEY,
    LEGACY_GOOGLE_KEY,
    LEGACY_RANCHER_KEY,
    LEGACY_OIDC_KEY,
    LEGACY_OIDC_LAST_KEY,
];

const LEGACY_OIDC_PREFIX: &str = "oidc__";
const MIGRATED_VALUE: &str = "true";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Unmigrated,
    Migrated,
}

impl MigrationState {
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Result<Self, StoreError> {
        Ok(match store.get(MIGRATED_KEY)?.as_deref() {
            Some(MIGRATED_VALUE) => Self::Migrated,
            _ => Self::Unmigrated,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyMigrated,
    /// No cluster collection is stored yet; the guard flag stays unset.
    NoClusters,
    Migrated(MigrationReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub clusters: usize,
    /// Ids whose provider credentials could not be recovered.
    pub unresolved: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyAwsToken {
    #[serde(rename = "accessKeyID")]
    access_key_id: String,
    #[serde(rename = "secretKey")]
    secret_key: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyGoogleTokens {
    access_token: String,
    id_token: String,
    refresh_token: String,
    token_type: String,
}

/// Raw legacy blobs as read from the store. Each one is decoded only when a
/// cluster actually needs it.
struct LegacyBlobs {
    aws: Option<String>,
    azure: Option<String>,
    google: Option<String>,
    google_client_id: Option<String>,
    rancher: Option<String>,
    oidc: Option<String>,
}

impl LegacyBlobs {
    fn load<S: KeyValueStore + ?Sized>(store: &S) -> Result<Self, MigrationError> {
        let get = |key: &str| store.get(key).map_err(|e| MigrationError::Store(e.to_string()));
        Ok(Self {
            aws: get(LEGACY_AWS_KEY)?,
            azure: get(LEGACY_AZURE_KEY)?,
            google: get(LEGACY_GOOGLE_KEY)?,
            google_client_id: get(LEGACY_GOOGLE_CLIENT_ID_KEY)?,
            rancher: get(LEGACY_RANCHER_KEY)?,
            oidc: get(LEGACY_OIDC_KEY)?,
        })
    }
}

fn decode_legacy<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, MigrationError> {
    serde_json::from_str(raw).map_err(|e| MigrationError::MalformedLegacyBlob {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Upgrade persisted clusters to the current record schema.
///
/// The pass runs at most once: on success the rewritten collection and the
/// guard flag are written together and every legacy key is deleted. Any
/// error leaves the store exactly as it was so the next attempt starts over.
pub fn migrate<S: KeyValueStore + ?Sized>(store: &S) -> Result<MigrationOutcome, MigrationError> {
    let state =
        MigrationState::load(store).map_err(|e| MigrationError::Store(e.to_string()))?;
    if state == MigrationState::Migrated {
        return Ok(MigrationOutcome::AlreadyMigrated);
    }

    let raw = store
        .get(CLUSTERS_KEY)
        .map_err(|e| MigrationError::Store(e.to_string()))?;
    let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
        debug!("no stored clusters, skipping migration");
        return Ok(MigrationOutcome::NoClusters);
    };

    let mut records: BTreeMap<String, ClusterRecord> = serde_json::from_str(&raw)
        .map_err(|e| MigrationError::MalformedClusters(e.to_string()))?;
    let legacy = LegacyBlobs::load(store)?;
    info!("migrating {} stored cluster(s)", records.len());

    let mut report = MigrationReport {
        clusters: records.len(),
        unresolved: Vec::new(),
    };
    for (id, record) in records.iter_mut() {
        if !migrate_record(id, record, &legacy)? {
            warn!(
                "cluster {id} ({}) left without recovered credentials",
                record.auth_provider
            );
            report.unresolved.push(id.clone());
        }
    }

    let encoded = serde_json::to_string(&records)
        .map_err(|e| MigrationError::Store(format!("failed to encode clusters: {e}")))?;
    store
        .set_many(&[(CLUSTERS_KEY, encoded.as_str()), (MIGRATED_KEY, MIGRATED_VALUE)])
        .map_err(|e| MigrationError::Store(e.to_string()))?;
    store
        .remove_many(&LEGACY_KEYS)
        .map_err(|e| MigrationError::Store(e.to_string()))?;

    info!(
        "migration complete, {} unresolved cluster(s)",
        report.unresolved.len()
    );
    Ok(MigrationOutcome::Migrated(report))
}

/// Rewrite one record in place. A payload the record already carries is
/// never replaced. Returns false when the record belongs to a provider whose
/// credentials could not be found.
fn migrate_record(
    id: &str,
    record: &mut ClusterRecord,
    legacy: &LegacyBlobs,
) -> Result<bool, MigrationError> {
    if record.auth_provider.is_empty() {
        record.auth_provider = AuthProviderKind::Kubeconfig.as_str().to_string();
        return Ok(true);
    }

    if let Some(name) = record.auth_provider.strip_prefix(LEGACY_OIDC_PREFIX) {
        let name = name.to_string();
        record.auth_provider = AuthProviderKind::Oidc.as_str().to_string();
        if record.oidc.is_none()
            && let Some(raw) = &legacy.oidc
        {
            let mut providers: BTreeMap<String, OidcCredentials> =
                decode_legacy(LEGACY_OIDC_KEY, raw)?;
            if let Some(provider) = providers.remove(&name) {
                record.oidc = Some(provider);
            }
        }
        return Ok(record.oidc.is_some());
    }

    match AuthProviderKind::from_tag(&record.auth_provider) {
        Some(AuthProviderKind::Aws) => {
            if record.aws.is_none()
                && let Some(raw) = &legacy.aws
            {
                let mut tokens: BTreeMap<String, LegacyAwsToken> =
                    decode_legacy(LEGACY_AWS_KEY, raw)?;
                let parts = id.split('_').collect::<Vec<_>>();
                if parts.len() >= 3
                    && let Some(token) = tokens.remove(parts[1])
                {
                    record.aws = Some(AwsCredentials {
                        access_key_id: token.access_key_id,
                        cluster_id: parts[2..].join("_"),
                        region: parts[1].to_string(),
                        secret_key: token.secret_key,
                        session_token: None,
                    });
                }
            }
            Ok(record.aws.is_some())
        }
        Some(AuthProviderKind::Google) => {
            if record.google.is_none()
                && let (Some(raw), Some(client_id)) = (&legacy.google, &legacy.google_client_id)
            {
                let tokens: LegacyGoogleTokens = decode_legacy(LEGACY_GOOGLE_KEY, raw)?;
                record.google = Some(GoogleCredentials {
                    access_token: tokens.access_token,
                    client_id: client_id.clone(),
                    expires: 0,
                    id_token: tokens.id_token,
                    refresh_token: tokens.refresh_token,
                    token_type: tokens.token_type,
                    cluster_id: None,
                });
            }
            Ok(record.google.is_some())
        }
        Some(AuthProviderKind::Rancher) => {
            if record.rancher.is_none()
                && let Some(raw) = &legacy.rancher
            {
                let credentials: RancherCredentials = decode_legacy(LEGACY_RANCHER_KEY, raw)?;
                record.rancher = Some(credentials);
            }
            Ok(record.rancher.is_some())
        }
        Some(AuthProviderKind::Azure) => {
            if record.azure.is_none()
                && let Some(raw) = &legacy.azure
            {
                let credentials: AzureCredentials = decode_legacy(LEGACY_AZURE_KEY, raw)?;
                record.azure = Some(credentials);
            }
            Ok(record.azure.is_some())
        }
        _ => Ok(true),
    }
}
