use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Retention never drops below this many jobs.
pub const MIN_JOB_RETENTION: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_registry_api_url")]
    pub registry_api_url: String,
    #[serde(default)]
    pub registry_push_host: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_catalog_results")]
    pub max_catalog_results: usize,
    #[serde(default = "default_job_retention")]
    pub job_retention: usize,
    #[serde(default = "default_cleanup_poll_interval_ms")]
    pub cleanup_poll_interval_ms: u64,
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8390
}

fn default_registry_api_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_max_catalog_results() -> usize {
    200
}

fn default_job_retention() -> usize {
    120
}

fn default_cleanup_poll_interval_ms() -> u64 {
    600
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            registry_api_url: default_registry_api_url(),
            registry_push_host: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_catalog_results: default_max_catalog_results(),
            job_retention: default_job_retention(),
            cleanup_poll_interval_ms: default_cleanup_poll_interval_ms(),
            docker_bin: default_docker_bin(),
            log_dir: None,
        }
    }
}

impl Settings {
    /// Registry API base URL with a scheme and without a trailing slash.
    pub fn api_url(&self) -> String {
        normalize_registry_url(&self.registry_api_url)
    }

    /// `host[:port]` used in image references pushed to the registry.
    pub fn push_host(&self) -> String {
        resolve_push_host(&self.api_url(), self.registry_push_host.as_deref())
    }

    pub fn retention(&self) -> usize {
        self.job_retention.max(MIN_JOB_RETENTION)
    }

    /// Override fields from environment-style variables.
    ///
    /// Numeric values that fail to parse are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("REGISTRY_API_URL").filter(|v| !v.trim().is_empty()) {
            self.registry_api_url = v;
        }
        if let Some(v) = lookup("REGISTRY_PUSH_HOST").filter(|v| !v.trim().is_empty()) {
            self.registry_push_host = Some(v);
        }
        if let Some(v) = lookup("DOCKER_BIN").filter(|v| !v.trim().is_empty()) {
            self.docker_bin = v;
        }
        if let Some(v) = parse_env(&lookup, "REQUEST_TIMEOUT_SEC") {
            self.request_timeout_secs = v;
        }
        if let Some(v) = parse_env(&lookup, "MAX_CATALOG_RESULTS") {
            self.max_catalog_results = v;
        }
        if let Some(v) = parse_env(&lookup, "SYNC_JOB_RETENTION") {
            self.job_retention = v;
        }
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}: '{}' is not a valid number", key, raw);
            None
        }
    }
}

pub fn normalize_registry_url(raw: &str) -> String {
    let value = raw.trim();
    let value = if value.is_empty() {
        default_registry_api_url()
    } else if value.starts_with("http://") || value.starts_with("https://") {
        value.to_string()
    } else {
        format!("http://{}", value)
    };
    value.trim_end_matches('/').to_string()
}

/// `host[:port]` used in pushed references. The authority of the API URL is
/// kept as written, so an explicit default port such as `:80` survives.
pub fn resolve_push_host(registry_url: &str, explicit: Option<&str>) -> String {
    if let Some(host) = explicit.map(str::trim).filter(|h| !h.is_empty()) {
        return strip_scheme(host).trim_end_matches('/').to_string();
    }
    strip_scheme(registry_url.trim())
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn strip_scheme(value: &str) -> &str {
    value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 8390);
        assert_eq!(settings.registry_api_url, "http://127.0.0.1:5000");
        assert!(settings.registry_push_host.is_none());
        assert_eq!(settings.request_timeout_secs, 20);
        assert_eq!(settings.max_catalog_results, 200);
        assert_eq!(settings.job_retention, 120);
        assert_eq!(settings.cleanup_poll_interval_ms, 600);
        assert_eq!(settings.docker_bin, "docker");
        assert!(settings.log_dir.is_none());
    }

    #[test]
    fn test_settings_partial_deserialization() {
        let json = r#"{"port": 9000, "registry_api_url": "registry.local:5000"}"#;
        let settings: Settings = serde_json::from_str(json).expect("deserialize");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.api_url(), "http://registry.local:5000");
        assert_eq!(settings.push_host(), "registry.local:5000");
    }

    #[test]
    fn test_retention_is_floored() {
        let settings = Settings {
            job_retention: 3,
            ..Default::default()
        };
        assert_eq!(settings.retention(), MIN_JOB_RETENTION);
        let settings = Settings {
            job_retention: 500,
            ..Default::default()
        };
        assert_eq!(settings.retention(), 500);
    }

    #[test]
    fn test_normalize_registry_url() {
        assert_eq!(normalize_registry_url("r.local:5000/"), "http://r.local:5000");
        assert_eq!(
            normalize_registry_url("https://r.example.com"),
            "https://r.example.com"
        );
        assert_eq!(normalize_registry_url("  "), "http://127.0.0.1:5000");
    }

    #[test]
    fn test_resolve_push_host() {
        assert_eq!(
            resolve_push_host("http://192.168.5.54:5000", None),
            "192.168.5.54:5000"
        );
        assert_eq!(
            resolve_push_host("https://registry.example.com", None),
            "registry.example.com"
        );
        assert_eq!(
            resolve_push_host("http://x:5000", Some("https://push.local:443/")),
            "push.local:443"
        );
        assert_eq!(resolve_push_host("http://x:5000", Some("  ")), "x:5000");
        assert_eq!(resolve_push_host("http://reg.local:80", None), "reg.local:80");
        assert_eq!(resolve_push_host("https://reg.local:443/", None), "reg.local:443");
        // Nothing left after the scheme; plan builders reject the empty host
        assert_eq!(resolve_push_host("http://x:5000", Some("http://")), "");
    }

    #[test]
    fn test_apply_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REGISTRY_API_URL", "http://env.local:5000"),
            ("REGISTRY_PUSH_HOST", "push.env.local"),
            ("SYNC_JOB_RETENTION", "42"),
            ("REQUEST_TIMEOUT_SEC", "not-a-number"),
            ("DOCKER_BIN", "podman"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.api_url(), "http://env.local:5000");
        assert_eq!(settings.push_host(), "push.env.local");
        assert_eq!(settings.job_retention, 42);
        assert_eq!(settings.request_timeout_secs, 20);
        assert_eq!(settings.docker_bin, "podman");
    }
}
