use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_ENV: &str = "KUBENAV_CONFIG";
const STORE_FILE_NAME: &str = "storage.json";
const FALLBACK_STORE_PATH: &str = "kubenav-storage.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub source: Option<PathBuf>,
    pub store_path: PathBuf,
    pub log_filter: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct KubenavConfigFile {
    #[serde(default)]
    store_path: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    log_filter: String,
}

impl RuntimeConfig {
    /// Load the first config file found on the usual search path, or the
    /// defaults when there is none.
    pub fn discover() -> Result<Self> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let override_path = std::env::var(CONFIG_ENV).ok();
        let path = discover_config_path(override_path, Path::new("."), home.as_deref());
        Self::load(path.as_deref(), home.as_deref())
    }

    pub fn load(path: Option<&Path>, home: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self {
                source: None,
                store_path: default_store_path(home),
                log_filter: default_log_filter(),
            });
        };

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config {}", path.display()))?;
        let parsed: KubenavConfigFile = if raw.trim().is_empty() {
            KubenavConfigFile {
                log_filter: default_log_filter(),
                ..KubenavConfigFile::default()
            }
        } else {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse runtime config {}", path.display()))?
        };

        Ok(Self {
            source: Some(path.to_path_buf()),
            store_path: parsed
                .store_path
                .unwrap_or_else(|| default_store_path(home)),
            log_filter: parsed.log_filter,
        })
    }

    /// Command-line values win over the file.
    pub fn with_overrides(
        mut self,
        store_path: Option<PathBuf>,
        log_filter: Option<String>,
    ) -> Self {
        if let Some(store_path) = store_path {
            self.store_path = store_path;
        }
        if let Some(log_filter) = log_filter {
            self.log_filter = log_filter;
        }
        self
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_store_path(home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) => home.join(".config/kubenav").join(STORE_FILE_NAME),
        None => PathBuf::from(FALLBACK_STORE_PATH),
    }
}

fn discover_config_path(
    override_path: Option<String>,
    cwd: &Path,
    home: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = override_path
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        cwd.join("kubenav.yaml"),
        cwd.join("kubenav.yml"),
        cwd.join(".kubenav.yaml"),
    ];
    if let Some(candidate) = cwd_candidates.into_iter().find(|c| c.exists()) {
        return Some(candidate);
    }

    if let Some(home) = home {
        let user_candidates = [
            home.join(".config/kubenav/config.yaml"),
            home.join(".config/kubenav/config.yml"),
            home.join(".kubenav.yaml"),
        ];
        if let Some(candidate) = user_candidates.into_iter().find(|c| c.exists()) {
            return Some(candidate);
        }
    }

    None
}
