use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::StoreError;
use crate::store::{KeyValueStore, SETTINGS_KEY};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Dark,
    Light,
}

impl Theme {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "system" => Some(Self::System),
            "dark" => Some(Self::Dark),
            "light" => Some(Self::Light),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub theme: Theme,
    pub authentication_enabled: bool,
    pub timeout: u64,
    pub terminal_font_size: u32,
    pub terminal_scrollback: u32,
    pub enable_pod_metrics: bool,
    pub query_limit: u32,
    pub query_refetch_interval: u64,
    pub ssh_key: String,
    pub ssh_port: String,
    pub ssh_user: String,
    pub prometheus_enabled: bool,
    pub prometheus_namespace: String,
    pub prometheus_selector: String,
    pub prometheus_port: u16,
    pub prometheus_username: String,
    pub prometheus_password: String,
    pub prometheus_address: String,
    pub prometheus_dashboards_namespace: String,
    pub elasticsearch_enabled: bool,
    pub elasticsearch_namespace: String,
    pub elasticsearch_selector: String,
    pub elasticsearch_port: u16,
    pub elasticsearch_username: String,
    pub elasticsearch_password: String,
    pub elasticsearch_address: String,
    pub jaeger_enabled: bool,
    pub jaeger_namespace: String,
    pub jaeger_selector: String,
    pub jaeger_port: u16,
    pub jaeger_username: String,
    pub jaeger_password: String,
    pub jaeger_query_base_path: String,
    pub jaeger_address: String,
    pub proxy_enabled: bool,
    pub proxy_address: String,
    pub helm_show_all_versions: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            authentication_enabled: false,
            timeout: 60,
            terminal_font_size: 12,
            terminal_scrollback: 10_000,
            enable_pod_metrics: true,
            query_limit: 100,
            query_refetch_interval: 5 * 60 * 1000,
            ssh_key: String::new(),
            ssh_port: "22".to_string(),
            ssh_user: "root".to_string(),
            prometheus_enabled: false,
            prometheus_namespace: "monitoring".to_string(),
            prometheus_selector: "app=prometheus".to_string(),
            prometheus_port: 9090,
            prometheus_username: String::new(),
            prometheus_password: String::new(),
            prometheus_address: String::new(),
            prometheus_dashboards_namespace: "kubenav".to_string(),
            elasticsearch_enabled: false,
            elasticsearch_namespace: "logging".to_string(),
            elasticsearch_selector: "app=elasticsearch".to_string(),
            elasticsearch_port: 9200,
            elasticsearch_username: String::new(),
            elasticsearch_password: String::new(),
            elasticsearch_address: String::new(),
            jaeger_enabled: false,
            jaeger_namespace: "tracing".to_string(),
            jaeger_selector: "app=jaeger".to_string(),
            jaeger_port: 16686,
            jaeger_username: String::new(),
            jaeger_password: String::new(),
            jaeger_query_base_path: String::new(),
            jaeger_address: String::new(),
            proxy_enabled: false,
            proxy_address: String::new(),
            helm_show_all_versions: false,
        }
    }
}

impl AppSettings {
    /// Merge a persisted settings object over the defaults, field by field.
    ///
    /// Non-boolean fields keep the persisted value only when it is present and
    /// truthy; boolean fields keep it whenever the key is present, so an
    /// explicit `false` survives. The `*Address` fields are resolved at
    /// runtime and always start empty.
    pub fn merged(persisted: &Map<String, Value>) -> Self {
        let defaults = Self::default();
        let fields = Fields(persisted);

        Self {
            theme: fields
                .string("theme")
                .and_then(|theme| Theme::from_token(&theme))
                .unwrap_or(defaults.theme),
            authentication_enabled: fields
                .flag("authenticationEnabled")
                .unwrap_or(defaults.authentication_enabled),
            timeout: fields.number("timeout").unwrap_or(defaults.timeout),
            terminal_font_size: fields
                .number("terminalFontSize")
                .unwrap_or(defaults.terminal_font_size),
            terminal_scrollback: fields
                .number("terminalScrollback")
                .unwrap_or(defaults.terminal_scrollback),
            enable_pod_metrics: fields
                .flag("enablePodMetrics")
                .unwrap_or(defaults.enable_pod_metrics),
            query_limit: fields.number("queryLimit").unwrap_or(defaults.query_limit),
            query_refetch_interval: fields
                .number("queryRefetchInterval")
                .unwrap_or(defaults.query_refetch_interval),
            ssh_key: fields.string("sshKey").unwrap_or(defaults.ssh_key),
            ssh_port: fields.string("sshPort").unwrap_or(defaults.ssh_port),
            ssh_user: fields.string("sshUser").unwrap_or(defaults.ssh_user),
            prometheus_enabled: fields
                .flag("prometheusEnabled")
                .unwrap_or(defaults.prometheus_enabled),
            prometheus_namespace: fields
                .string("prometheusNamespace")
                .unwrap_or(defaults.prometheus_namespace),
            prometheus_selector: fields
                .string("prometheusSelector")
                .unwrap_or(defaults.prometheus_selector),
            prometheus_port: fields
                .number("prometheusPort")
                .unwrap_or(defaults.prometheus_port),
            prometheus_username: fields
                .string("prometheusUsername")
                .unwrap_or(defaults.prometheus_username),
            prometheus_password: fields
                .string("prometheusPassword")
                .unwrap_or(defaults.prometheus_password),
            prometheus_address: defaults.prometheus_address,
            prometheus_dashboards_namespace: fields
                .string("prometheusDashboardsNamespace")
                .unwrap_or(defaults.prometheus_dashboards_namespace),
            elasticsearch_enabled: fields
                .flag("elasticsearchEnabled")
                .unwrap_or(defaults.elasticsearch_enabled),
            elasticsearch_namespace: fields
                .string("elasticsearchNamespace")
                .unwrap_or(defaults.elasticsearch_namespace),
            elasticsearch_selector: fields
                .string("elasticsearchSelector")
                .unwrap_or(defaults.elasticsearch_selector),
            elasticsearch_port: fields
                .number("elasticsearchPort")
                .unwrap_or(defaults.elasticsearch_port),
            elasticsearch_username: fields
                .string("elasticsearchUsername")
                .unwrap_or(defaults.elasticsearch_username),
            elasticsearch_password: fields
                .string("elasticsearchPassword")
                .unwrap_or(defaults.elasticsearch_password),
            elasticsearch_address: defaults.elasticsearch_address,
            jaeger_enabled: fields.flag("jaegerEnabled").unwrap_or(defaults.jaeger_enabled),
            jaeger_namespace: fields
                .string("jaegerNamespace")
                .unwrap_or(defaults.jaeger_namespace),
            jaeger_selector: fields
                .string("jaegerSelector")
                .unwrap_or(defaults.jaeger_selector),
            jaeger_port: fields.number("jaegerPort").unwrap_or(defaults.jaeger_port),
            jaeger_username: fields
                .string("jaegerUsername")
                .unwrap_or(defaults.jaeger_username),
            jaeger_password: fields
                .string("jaegerPassword")
                .unwrap_or(defaults.jaeger_password),
            jaeger_query_base_path: fields
                .string("jaegerQueryBasePath")
                .unwrap_or(defaults.jaeger_query_base_path),
            jaeger_address: defaults.jaeger_address,
            proxy_enabled: fields.flag("proxyEnabled").unwrap_or(defaults.proxy_enabled),
            proxy_address: fields
                .string("proxyAddress")
                .unwrap_or(defaults.proxy_address),
            helm_show_all_versions: fields
                .flag("helmShowAllVersions")
                .unwrap_or(defaults.helm_show_all_versions),
        }
    }
}

struct Fields<'a>(&'a Map<String, Value>);

impl Fields<'_> {
    fn truthy(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| match value {
            Value::Null => false,
            Value::Bool(flag) => *flag,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        })
    }

    fn string(&self, key: &str) -> Option<String> {
        match self.truthy(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn number<T: TryFrom<u64>>(&self, key: &str) -> Option<T> {
        let raw = match self.truthy(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }?;
        T::try_from(raw).ok()
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }
}

/// Persisted settings merged over the defaults; defaults alone when nothing
/// is stored.
pub fn read_settings<S: KeyValueStore + ?Sized>(store: &S) -> Result<AppSettings, StoreError> {
    let Some(raw) = store.get(SETTINGS_KEY)?.filter(|raw| !raw.is_empty()) else {
        return Ok(AppSettings::default());
    };
    let value: Value = serde_json::from_str(&raw).map_err(|e| StoreError::Decode {
        key: SETTINGS_KEY.to_string(),
        message: e.to_string(),
    })?;
    match value {
        Value::Object(persisted) => Ok(AppSettings::merged(&persisted)),
        other => {
            warn!("stored settings are not an object ({other}), using defaults");
            Ok(AppSettings::default())
        }
    }
}

pub fn save_settings<S: KeyValueStore + ?Sized>(
    store: &S,
    settings: &AppSettings,
) -> Result<(), StoreError> {
    let encoded = serde_json::to_string(settings).map_err(|e| StoreError::Encode {
        key: SETTINGS_KEY.to_string(),
        message: e.to_string(),
    })?;
    store.set(SETTINGS_KEY, &encoded)
}

#[cfg(test)]
mod tests {
    use super::{AppSettings, Theme, read_settings, save_settings};
    use crate::store::MemoryStore;

    #[test]
    fn empty_store_returns_defaults() {
        let store = MemoryStore::new();
        assert_eq!(read_settings(&store).unwrap(), AppSettings::default());
    }

    #[test]
    fn explicit_false_is_preserved() {
        let store = MemoryStore::with_entries([("settings", r#"{"jaegerEnabled": false}"#)]);
        let settings = read_settings(&store).unwrap();
        assert!(!settings.jaeger_enabled);
        assert_eq!(settings, AppSettings::default());

        let store = MemoryStore::with_entries([("settings", r#"{"enablePodMetrics": false}"#)]);
        let settings = read_settings(&store).unwrap();
        assert!(!settings.enable_pod_metrics);
        assert_eq!(
            settings,
            AppSettings {
                enable_pod_metrics: false,
                ..AppSettings::default()
            }
        );
    }

    #[test]
    fn falsy_values_fall_back_to_defaults() {
        let store = MemoryStore::with_entries([(
            "settings",
            r#"{"timeout": 0, "sshUser": "", "prometheusNamespace": null, "theme": "neon"}"#,
        )]);
        assert_eq!(read_settings(&store).unwrap(), AppSettings::default());
    }

    #[test]
    fn historical_blob_gains_new_fields() {
        let store = MemoryStore::with_entries([(
            "settings",
            r#"{"theme": "dark", "timeout": 120, "sshPort": 2222, "prometheusEnabled": true, "prometheusPort": "9091"}"#,
        )]);
        let settings = read_settings(&store).unwrap();
        assert_eq!(settings.theme, Theme::Dark);
        assert_eq!(settings.timeout, 120);
        assert_eq!(settings.ssh_port, "2222");
        assert!(settings.prometheus_enabled);
        assert_eq!(settings.prometheus_port, 9091);
        assert_eq!(settings.jaeger_namespace, "tracing");
        assert!(!settings.helm_show_all_versions);
    }

    #[test]
    fn addresses_are_never_restored() {
        let store = MemoryStore::with_entries([(
            "settings",
            r#"{"prometheusAddress": "http://localhost:9090", "jaegerAddress": "x", "elasticsearchAddress": "y"}"#,
        )]);
        let settings = read_settings(&store).unwrap();
        assert_eq!(settings.prometheus_address, "");
        assert_eq!(settings.jaeger_address, "");
        assert_eq!(settings.elasticsearch_address, "");
    }

    #[test]
    fn out_of_range_numbers_fall_back() {
        let store = MemoryStore::with_entries([("settings", r#"{"jaegerPort": 700000}"#)]);
        assert_eq!(read_settings(&store).unwrap().jaeger_port, 16686);
    }

    #[test]
    fn non_object_blob_returns_defaults() {
        let store = MemoryStore::with_entries([("settings", "[1, 2]")]);
        assert_eq!(read_settings(&store).unwrap(), AppSettings::default());

        let store = MemoryStore::with_entries([("settings", "{oops")]);
        assert!(read_settings(&store).is_err());
    }

    #[test]
    fn saved_settings_read_back() {
        let store = MemoryStore::new();
        let settings = AppSettings {
            theme: Theme::Light,
            proxy_enabled: true,
            proxy_address: "http://proxy:3128".to_string(),
            jaeger_enabled: true,
            ..AppSettings::default()
        };
        save_settings(&store, &settings).unwrap();
        assert_eq!(read_settings(&store).unwrap(), settings);
    }
}
