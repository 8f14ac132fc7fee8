pub mod cleanup;
pub mod executor;
pub mod manager;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::daemon::manager::JobManager;
use crate::models::Settings;
use crate::process::SystemSpawner;
use crate::registry::{HttpRegistryClient, RegistryApi};
use crate::server::{self, AppState};

/// Environment variable naming a directory that holds `config.json`.
pub const CONFIG_DIR_ENV: &str = "REGSYNC_CONFIG_DIR";

const APP_DIR_NAME: &str = "registry-sync";
const LOG_FILE_PREFIX: &str = "regsync.log";

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

fn read_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(settings)
}

/// Locate the config file, in order:
///   1. explicit `--config` path (must exist)
///   2. `$REGSYNC_CONFIG_DIR/config.json`
///   3. `dirs::config_dir()/registry-sync/config.json`
///
/// Returns `Ok(None)` when nothing is found.
pub fn resolve_config_path(config_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    if let Ok(config_dir) = std::env::var(CONFIG_DIR_ENV) {
        let path = PathBuf::from(&config_dir).join("config.json");
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join(APP_DIR_NAME).join("config.json");
        if path.exists() {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

/// Load settings from the resolved config file (or defaults), then apply
/// environment overrides. Also returns the file the settings came from.
///
/// Runs before the subscriber exists, so the caller logs the source.
pub fn load_config(config_path: Option<&Path>) -> Result<(Settings, Option<PathBuf>)> {
    let source = resolve_config_path(config_path)?;
    let mut settings = match &source {
        Some(path) => read_settings(path)?,
        None => Settings::default(),
    };
    settings.apply_env(|key| std::env::var(key).ok());
    Ok((settings, source))
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global subscriber: stderr always, plus a daily-rolling file
/// under `log_dir` when given. The returned guard must outlive the process's
/// logging.
pub fn init_tracing(
    verbose: bool,
    log_dir: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = log_dir else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init();
        return None;
    };

    if let Err(e) = std::fs::create_dir_all(dir) {
        let result = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init();
        if result.is_ok() {
            tracing::warn!(
                "Could not create log dir {}: {}. Logging to stderr only.",
                dir.display(),
                e
            );
        }
        return None;
    }

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    if result.is_ok() {
        tracing::info!("Logging to stderr and {}", dir.display());
    }
    Some(guard)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Wire the real registry client and process spawner into application state.
pub fn build_state(settings: Settings) -> Result<Arc<AppState>> {
    let registry: Arc<dyn RegistryApi> = Arc::new(
        HttpRegistryClient::new(
            &settings.api_url(),
            Duration::from_secs(settings.request_timeout_secs.max(1)),
        )
        .context("Failed to build registry client")?,
    );
    let manager = JobManager::new(&settings, registry, Arc::new(SystemSpawner));
    Ok(Arc::new(AppState {
        manager: Arc::new(manager),
        settings: Arc::new(settings),
        start_time: Instant::now(),
    }))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Received Ctrl+C signal");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM signal");
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl+C signal");
    }
}

/// Run the HTTP server in the foreground until Ctrl+C or SIGTERM.
///
/// Jobs still running at shutdown are abandoned; nothing is persisted.
pub async fn start_server(
    config_path: Option<&Path>,
    host_override: Option<&str>,
    port_override: Option<u16>,
    verbose: bool,
) -> Result<()> {
    let (mut settings, config_source) = load_config(config_path)?;
    if let Some(h) = host_override {
        settings.host = h.to_string();
    }
    if let Some(p) = port_override {
        settings.port = p;
    }

    let _log_guard = init_tracing(verbose, settings.log_dir.as_deref());
    match &config_source {
        Some(path) => tracing::info!("Loaded config from: {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }

    let bind_addr = format!("{}:{}", settings.host, settings.port);
    tracing::info!(
        "Registry API {} (push host {})",
        settings.api_url(),
        settings.push_host()
    );
    let state = build_state(settings)?;

    let router = server::create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("Server exited cleanly.");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_loading_from_file() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let config_path = tmp_dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{"port": 9999, "registry_api_url": "registry.local:5000/"}"#,
        )
        .expect("write config");

        let (settings, source) = load_config(Some(&config_path)).expect("load config");
        assert_eq!(source.as_deref(), Some(config_path.as_path()));
        assert_eq!(settings.port, 9999);
        assert_eq!(settings.api_url(), "http://registry.local:5000");
        // Other fields should be defaults
        assert_eq!(settings.cleanup_poll_interval_ms, 600);
    }

    #[test]
    fn test_config_loading_nonexistent_explicit_path_fails() {
        let result = load_config(Some(Path::new("/nonexistent/config.json")));
        assert!(result.is_err(), "Should fail for nonexistent explicit path");
    }

    #[test]
    fn test_config_loading_invalid_json_fails() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let config_path = tmp_dir.path().join("config.json");
        std::fs::write(&config_path, "{not json").expect("write config");
        let err = load_config(Some(&config_path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_resolve_explicit_path_wins() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let config_path = tmp_dir.path().join("custom.json");
        std::fs::write(&config_path, "{}").expect("write config");
        let resolved = resolve_config_path(Some(&config_path)).expect("resolve");
        assert_eq!(resolved, Some(config_path));
    }

    #[tokio::test]
    async fn test_build_state_wires_settings() {
        let settings = Settings {
            registry_api_url: "registry.local:5000".to_string(),
            job_retention: 3,
            ..Settings::default()
        };
        let state = build_state(settings).expect("build state");
        assert_eq!(state.manager.push_host(), "registry.local:5000");
        assert_eq!(state.manager.store().retention(), 20);
        assert_eq!(state.settings.api_url(), "http://registry.local:5000");
    }

    #[test]
    fn test_init_tracing_with_log_dir_returns_guard() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let log_dir = tmp_dir.path().join("logs");
        let guard = init_tracing(false, Some(&log_dir));
        assert!(guard.is_some());
        assert!(log_dir.exists());
    }
}
