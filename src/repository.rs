use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{ImportError, StoreError};
use crate::migrate::{MigrationOutcome, migrate};
use crate::model::{AuthProviderKind, Bookmark, Cluster, ClusterCollection, ClusterRecord};
use crate::normalize::clusters_from_kubeconfig;
use crate::settings::{self, AppSettings};
use crate::store::{ACTIVE_CLUSTER_KEY, BOOKMARKS_KEY, CLUSTERS_KEY, KeyValueStore};

/// Typed access to the persisted cluster collection, the active cluster id,
/// bookmarks and settings.
///
/// Every read-modify-write of the collection runs under one lock, so two
/// concurrent imports never lose each other's clusters.
pub struct ClusterRepository<S> {
    store: S,
    write_lock: Mutex<()>,
    migrated: AtomicBool,
}

impl<S: KeyValueStore> ClusterRepository<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            migrated: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the migrator once per process. A failed pass leaves the flag unset
    /// so the next read tries again.
    pub fn ensure_migrated(&self) -> Result<Option<MigrationOutcome>, StoreError> {
        if self.migrated.load(Ordering::Acquire) {
            return Ok(None);
        }
        let _guard = self.lock();
        if self.migrated.load(Ordering::Acquire) {
            return Ok(None);
        }

        let outcome = migrate(&self.store)?;
        if let MigrationOutcome::Migrated(report) = &outcome {
            info!(
                "upgraded {} stored cluster(s) to the current schema",
                report.clusters
            );
        }
        self.migrated.store(true, Ordering::Release);
        Ok(Some(outcome))
    }

    /// Decode the persisted collection. Records whose `authProvider` tag is
    /// unknown are logged and set aside so the rest stays usable.
    fn load_clusters(&self) -> Result<Option<StoredClusters>, StoreError> {
        let Some(raw) = self.store.get(CLUSTERS_KEY)?.filter(|raw| !raw.is_empty()) else {
            return Ok(None);
        };
        let records: BTreeMap<String, ClusterRecord> =
            serde_json::from_str(&raw).map_err(|e| StoreError::Decode {
                key: CLUSTERS_KEY.to_string(),
                message: e.to_string(),
            })?;

        let mut stored = StoredClusters::default();
        for (id, record) in records {
            if AuthProviderKind::from_tag(&record.auth_provider).is_none() {
                warn!(
                    "skipping cluster {id} with unknown auth provider '{}'",
                    record.auth_provider
                );
                stored.unreadable.insert(id, record);
                continue;
            }
            stored.clusters.insert(id, Cluster::try_from(record)?);
        }
        Ok(Some(stored))
    }

    fn write_clusters(&self, stored: &StoredClusters) -> Result<(), StoreError> {
        let mut records = stored.unreadable.clone();
        records.extend(
            stored
                .clusters
                .iter()
                .map(|(id, cluster)| (id.clone(), ClusterRecord::from(cluster.clone()))),
        );
        let encoded = serde_json::to_string(&records).map_err(|e| StoreError::Encode {
            key: CLUSTERS_KEY.to_string(),
            message: e.to_string(),
        })?;
        self.store.set(CLUSTERS_KEY, &encoded)
    }

    /// Load the collection, let `change` edit it and write it back, all under
    /// the write lock. Nothing is written when `change` fails.
    fn modify<T>(
        &self,
        change: impl FnOnce(&mut StoredClusters) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.ensure_migrated()?;
        let _guard = self.lock();
        let mut stored = self.load_clusters()?.unwrap_or_default();
        let value = change(&mut stored)?;
        self.write_clusters(&stored)?;
        Ok(value)
    }

    /// The stored clusters. Records with an unknown `authProvider` tag are
    /// left out.
    pub fn read_clusters(&self) -> Result<Option<ClusterCollection>, StoreError> {
        self.ensure_migrated()?;
        Ok(self.load_clusters()?.map(|stored| stored.clusters))
    }

    /// Replace the collection. Records with an unknown tag are kept.
    pub fn save_clusters(&self, clusters: &ClusterCollection) -> Result<(), StoreError> {
        self.modify(|stored| {
            stored.clusters = clusters.clone();
            Ok(())
        })
    }

    pub fn remove_clusters(&self) -> Result<(), StoreError> {
        let _guard = self.lock();
        self.store.remove(CLUSTERS_KEY)
    }

    /// Insert `clusters`, giving every cluster without an id the id
    /// `<authProvider>_<name>`, suffixed with `_2`, `_3`, ... when taken.
    /// Clusters that already carry an id replace the stored entry.
    pub fn add_clusters(&self, clusters: Vec<Cluster>) -> Result<Vec<String>, StoreError> {
        self.modify(|stored| {
            let mut ids = Vec::with_capacity(clusters.len());
            for mut cluster in clusters {
                if cluster.id.is_empty() {
                    cluster.id = stored.unique_id(&format!(
                        "{}_{}",
                        cluster.auth_provider.kind(),
                        cluster.name
                    ));
                }
                debug!("storing cluster {}", cluster.id);
                ids.push(cluster.id.clone());
                stored.unreadable.remove(&cluster.id);
                stored.clusters.insert(cluster.id.clone(), cluster);
            }
            Ok(ids)
        })
    }

    /// Parse, validate and store every context of a kubeconfig. The stored
    /// collection is left untouched when any context is rejected.
    pub fn import_kubeconfig(&self, raw: &str) -> Result<Vec<String>, ImportError> {
        let clusters = clusters_from_kubeconfig(raw)?;
        let ids = self.add_clusters(clusters)?;
        info!("imported {} cluster(s) from kubeconfig", ids.len());
        Ok(ids)
    }

    pub fn edit_cluster(&self, cluster: Cluster) -> Result<(), StoreError> {
        self.modify(|stored| match stored.clusters.get_mut(&cluster.id) {
            Some(slot) => {
                *slot = cluster;
                Ok(())
            }
            None => Err(StoreError::ClusterNotFound(cluster.id)),
        })
    }

    /// Remove one cluster, including one whose `authProvider` tag is unknown.
    /// The active cluster id is cleared when it pointed at the removed
    /// cluster.
    pub fn delete_cluster(&self, id: &str) -> Result<ClusterRecord, StoreError> {
        let removed = self.modify(|stored| {
            stored
                .clusters
                .remove(id)
                .map(ClusterRecord::from)
                .or_else(|| stored.unreadable.remove(id))
                .ok_or_else(|| StoreError::ClusterNotFound(id.to_string()))
        })?;

        let _guard = self.lock();
        if self.store.get(ACTIVE_CLUSTER_KEY)?.as_deref() == Some(id) {
            self.store.remove(ACTIVE_CLUSTER_KEY)?;
            debug!("cleared active cluster {id}");
        }
        Ok(removed)
    }

    pub fn set_namespace(&self, id: &str, namespace: &str) -> Result<(), StoreError> {
        self.modify(|stored| match stored.clusters.get_mut(id) {
            Some(cluster) => {
                cluster.namespace = namespace.to_string();
                Ok(())
            }
            None => Err(StoreError::ClusterNotFound(id.to_string())),
        })
    }

    /// The stored active id when set, otherwise the first cluster in the
    /// collection.
    pub fn read_active_cluster(&self) -> Result<Option<String>, StoreError> {
        if let Some(id) = self.store.get(ACTIVE_CLUSTER_KEY)?
            && !id.is_empty()
        {
            return Ok(Some(id));
        }
        Ok(self
            .read_clusters()?
            .and_then(|clusters| clusters.into_keys().next()))
    }

    pub fn save_active_cluster(&self, id: &str) -> Result<(), StoreError> {
        self.store.set(ACTIVE_CLUSTER_KEY, id)
    }

    pub fn remove_active_cluster(&self) -> Result<(), StoreError> {
        self.store.remove(ACTIVE_CLUSTER_KEY)
    }

    pub fn read_bookmarks(&self) -> Result<Vec<Bookmark>, StoreError> {
        let Some(raw) = self.store.get(BOOKMARKS_KEY)?.filter(|raw| !raw.is_empty()) else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|e| StoreError::Decode {
            key: BOOKMARKS_KEY.to_string(),
            message: e.to_string(),
        })
    }

    pub fn save_bookmarks(&self, bookmarks: &[Bookmark]) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(bookmarks).map_err(|e| StoreError::Encode {
            key: BOOKMARKS_KEY.to_string(),
            message: e.to_string(),
        })?;
        self.store.set(BOOKMARKS_KEY, &encoded)
    }

    pub fn read_settings(&self) -> Result<AppSettings, StoreError> {
        settings::read_settings(&self.store)
    }

    pub fn save_settings(&self, settings: &AppSettings) -> Result<(), StoreError> {
        settings::save_settings(&self.store, settings)
    }
}

/// The persisted collection split into clusters this build understands and
/// records it must carry through untouched.
#[derive(Debug, Default)]
struct StoredClusters {
    clusters: ClusterCollection,
    unreadable: BTreeMap<String, ClusterRecord>,
}

impl StoredClusters {
    fn contains(&self, id: &str) -> bool {
        self.clusters.contains_key(id) || self.unreadable.contains_key(id)
    }

    fn unique_id(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ClusterRepository;
    use crate::error::{ImportError, StoreError};
    use crate::model::{
        AuthProvider, AuthProviderKind, Bookmark, Cluster, ClusterCollection, DEFAULT_NAMESPACE,
        RancherCredentials,
    };
    use crate::store::{KeyValueStore, MemoryStore};

    const KUBECONFIG: &str = r#"
clusters:
  - name: dev
    cluster:
      server: https://dev.example.com
  - name: prod
    cluster:
      server: https://prod.example.com
users:
  - name: admin
    user:
      token: abc
contexts:
  - name: dev
    context: {cluster: dev, user: admin}
  - name: prod
    context: {cluster: prod, user: admin}
"#;

    fn repository() -> ClusterRepository<Arc<MemoryStore>> {
        ClusterRepository::new(Arc::new(MemoryStore::new()))
    }

    fn kubeconfig_cluster(name: &str) -> Cluster {
        let mut cluster = Cluster::new(name, AuthProvider::Kubeconfig);
        cluster.url = format!("https://{name}.example.com");
        cluster
    }

    #[test]
    fn empty_store_has_no_clusters() {
        let repo = repository();
        assert_eq!(repo.read_clusters().unwrap(), None);
        assert_eq!(repo.read_active_cluster().unwrap(), None);
    }

    #[test]
    fn save_then_read_round_trips() {
        let repo = repository();
        let mut collection = ClusterCollection::new();
        let mut cluster = kubeconfig_cluster("dev");
        cluster.id = "dev".to_string();
        collection.insert(cluster.id.clone(), cluster);

        repo.save_clusters(&collection).unwrap();
        assert_eq!(repo.read_clusters().unwrap(), Some(collection));

        repo.remove_clusters().unwrap();
        assert_eq!(repo.read_clusters().unwrap(), None);
    }

    #[test]
    fn import_assigns_ids_from_provider_and_name() {
        let repo = repository();
        let ids = repo.import_kubeconfig(KUBECONFIG).unwrap();
        assert_eq!(ids, vec!["kubeconfig_dev", "kubeconfig_prod"]);

        let clusters = repo.read_clusters().unwrap().unwrap();
        let dev = &clusters["kubeconfig_dev"];
        assert_eq!(dev.id, "kubeconfig_dev");
        assert_eq!(dev.url, "https://dev.example.com");
        assert_eq!(dev.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn colliding_ids_get_numeric_suffix() {
        let repo = repository();
        repo.import_kubeconfig(KUBECONFIG).unwrap();
        let ids = repo.import_kubeconfig(KUBECONFIG).unwrap();
        assert_eq!(ids, vec!["kubeconfig_dev_2", "kubeconfig_prod_2"]);

        let ids = repo
            .add_clusters(vec![kubeconfig_cluster("dev"), kubeconfig_cluster("dev")])
            .unwrap();
        assert_eq!(ids, vec!["kubeconfig_dev_3", "kubeconfig_dev_4"]);
        assert_eq!(repo.read_clusters().unwrap().unwrap().len(), 6);
    }

    #[test]
    fn failed_import_leaves_collection_untouched() {
        let repo = repository();
        repo.import_kubeconfig(KUBECONFIG).unwrap();
        let before = repo.store().snapshot();

        let broken = KUBECONFIG.replace("user: admin}\n  - name: prod", "user: nobody}\n  - name: prod");
        let err = repo.import_kubeconfig(&broken).unwrap_err();
        assert!(matches!(err, ImportError::Validation(_)));
        assert!(matches!(
            repo.import_kubeconfig("").unwrap_err(),
            ImportError::Parse(_)
        ));

        assert_eq!(repo.store().snapshot(), before);
    }

    #[test]
    fn edit_replaces_by_id_and_rejects_unknown() {
        let repo = repository();
        repo.import_kubeconfig(KUBECONFIG).unwrap();

        let mut dev = repo.read_clusters().unwrap().unwrap()["kubeconfig_dev"].clone();
        dev.token = "rotated".to_string();
        repo.edit_cluster(dev.clone()).unwrap();
        assert_eq!(
            repo.read_clusters().unwrap().unwrap()["kubeconfig_dev"].token,
            "rotated"
        );

        dev.id = "missing".to_string();
        assert!(matches!(
            repo.edit_cluster(dev),
            Err(StoreError::ClusterNotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn set_namespace_updates_single_cluster() {
        let repo = repository();
        repo.import_kubeconfig(KUBECONFIG).unwrap();
        repo.set_namespace("kubeconfig_prod", "payments").unwrap();

        let clusters = repo.read_clusters().unwrap().unwrap();
        assert_eq!(clusters["kubeconfig_prod"].namespace, "payments");
        assert_eq!(clusters["kubeconfig_dev"].namespace, DEFAULT_NAMESPACE);
        assert!(repo.set_namespace("nope", "x").is_err());
    }

    #[test]
    fn active_cluster_falls_back_to_first_id() {
        let repo = repository();
        repo.import_kubeconfig(KUBECONFIG).unwrap();
        assert_eq!(
            repo.read_active_cluster().unwrap().as_deref(),
            Some("kubeconfig_dev")
        );

        repo.save_active_cluster("kubeconfig_prod").unwrap();
        assert_eq!(
            repo.read_active_cluster().unwrap().as_deref(),
            Some("kubeconfig_prod")
        );

        repo.save_active_cluster("").unwrap();
        assert_eq!(
            repo.read_active_cluster().unwrap().as_deref(),
            Some("kubeconfig_dev")
        );

        repo.remove_active_cluster().unwrap();
        assert_eq!(repo.store().get("cluster").unwrap(), None);
    }

    #[test]
    fn deleting_active_cluster_clears_active_id() {
        let repo = repository();
        repo.import_kubeconfig(KUBECONFIG).unwrap();
        repo.save_active_cluster("kubeconfig_prod").unwrap();

        repo.delete_cluster("kubeconfig_dev").unwrap();
        assert_eq!(
            repo.store().get("cluster").unwrap().as_deref(),
            Some("kubeconfig_prod")
        );

        let removed = repo.delete_cluster("kubeconfig_prod").unwrap();
        assert_eq!(removed.name, "prod");
        assert_eq!(repo.store().get("cluster").unwrap(), None);
        assert!(repo.read_clusters().unwrap().unwrap().is_empty());
        assert!(matches!(
            repo.delete_cluster("kubeconfig_prod"),
            Err(StoreError::ClusterNotFound(_))
        ));
    }

    #[test]
    fn legacy_clusters_are_migrated_on_first_read() {
        let store = Arc::new(MemoryStore::with_entries([
            (
                "clusters",
                r#"{"old":{"id":"old","name":"old","url":"https://old","authProvider":""}}"#,
            ),
            ("oidc_last", "old-provider"),
        ]));
        let repo = ClusterRepository::new(store.clone());

        let clusters = repo.read_clusters().unwrap().unwrap();
        assert_eq!(clusters["old"].auth_provider, AuthProvider::Kubeconfig);
        assert_eq!(store.get("migrated").unwrap().as_deref(), Some("true"));
        assert_eq!(store.get("oidc_last").unwrap(), None);
    }

    #[test]
    fn failed_migration_is_retried_on_next_read() {
        let store = Arc::new(MemoryStore::with_entries([
            (
                "clusters",
                r#"{"aws_eu-west-1_prod":{"id":"aws_eu-west-1_prod","name":"prod","authProvider":"aws"}}"#,
            ),
            ("aws", "{not json"),
        ]));
        let repo = ClusterRepository::new(store.clone());

        assert!(matches!(
            repo.read_clusters(),
            Err(StoreError::Migration(_))
        ));
        assert_eq!(store.get("migrated").unwrap(), None);

        store.remove("aws").unwrap();
        let clusters = repo.read_clusters().unwrap().unwrap();
        assert_eq!(
            clusters["aws_eu-west-1_prod"].auth_provider,
            AuthProvider::unresolved(AuthProviderKind::Aws)
        );
        assert_eq!(store.get("migrated").unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn unknown_provider_tag_is_skipped_and_preserved() {
        let store = Arc::new(MemoryStore::with_entries([
            ("migrated", "true"),
            (
                "clusters",
                r#"{"x":{"id":"x","name":"x","authProvider":"openshift","token":"keep-me"}}"#,
            ),
        ]));
        let repo = ClusterRepository::new(store.clone());

        assert_eq!(repo.read_clusters().unwrap(), Some(ClusterCollection::new()));
        assert_eq!(repo.read_active_cluster().unwrap(), None);

        let ids = repo.add_clusters(vec![kubeconfig_cluster("dev")]).unwrap();
        assert_eq!(ids, vec!["kubeconfig_dev"]);
        repo.set_namespace("kubeconfig_dev", "apps").unwrap();
        assert!(matches!(
            repo.set_namespace("x", "apps"),
            Err(StoreError::ClusterNotFound(_))
        ));

        let clusters = repo.read_clusters().unwrap().unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters["kubeconfig_dev"].namespace, "apps");

        let raw: serde_json::Value =
            serde_json::from_str(&store.get("clusters").unwrap().unwrap()).unwrap();
        assert_eq!(raw["x"]["authProvider"], "openshift");
        assert_eq!(raw["x"]["token"], "keep-me");

        repo.save_clusters(&clusters).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&store.get("clusters").unwrap().unwrap()).unwrap();
        assert_eq!(raw["x"]["authProvider"], "openshift");

        let removed = repo.delete_cluster("x").unwrap();
        assert_eq!(removed.auth_provider, "openshift");
        let raw: serde_json::Value =
            serde_json::from_str(&store.get("clusters").unwrap().unwrap()).unwrap();
        assert!(raw.get("x").is_none());

        repo.delete_cluster("kubeconfig_dev").unwrap();
        assert!(repo.read_clusters().unwrap().unwrap().is_empty());
    }

    #[test]
    fn new_ids_avoid_records_with_unknown_tags() {
        let repo = ClusterRepository::new(MemoryStore::with_entries([
            ("migrated", "true"),
            (
                "clusters",
                r#"{"kubeconfig_dev":{"id":"kubeconfig_dev","name":"dev","authProvider":"openshift"}}"#,
            ),
        ]));
        let ids = repo.add_clusters(vec![kubeconfig_cluster("dev")]).unwrap();
        assert_eq!(ids, vec!["kubeconfig_dev_2"]);
    }

    #[test]
    fn credentials_saved_after_migration_survive_restart() {
        let store = Arc::new(MemoryStore::with_entries([(
            "rancher",
            r#"{"rancherUrl":"https://old-rancher","bearerToken":"stale"}"#,
        )]));

        let repo = ClusterRepository::new(store.clone());
        assert_eq!(repo.read_clusters().unwrap(), None);
        let mut cluster = Cluster::new(
            "prod",
            AuthProvider::Rancher(Some(RancherCredentials {
                rancher_url: "https://new-rancher".to_string(),
                bearer_token: "fresh".to_string(),
                ..RancherCredentials::default()
            })),
        );
        cluster.url = "https://new-rancher/k8s/clusters/c-1".to_string();
        let ids = repo.add_clusters(vec![cluster]).unwrap();

        let restarted = ClusterRepository::new(store.clone());
        let clusters = restarted.read_clusters().unwrap().unwrap();
        let AuthProvider::Rancher(Some(credentials)) = &clusters[&ids[0]].auth_provider else {
            panic!("expected rancher credentials");
        };
        assert_eq!(credentials.bearer_token, "fresh");
        assert_eq!(credentials.rancher_url, "https://new-rancher");
    }

    #[test]
    fn bookmarks_default_to_empty() {
        let repo = repository();
        assert!(repo.read_bookmarks().unwrap().is_empty());

        let bookmarks = vec![Bookmark {
            title: "Pods".to_string(),
            url: "/resources/core/v1/pods".to_string(),
            namespace: "kube-system".to_string(),
        }];
        repo.save_bookmarks(&bookmarks).unwrap();
        assert_eq!(repo.read_bookmarks().unwrap(), bookmarks);
    }

    #[test]
    fn concurrent_imports_keep_every_cluster() {
        let repo = Arc::new(repository());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || repo.import_kubeconfig(KUBECONFIG).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(repo.read_clusters().unwrap().unwrap().len(), 16);
    }
}
