//! ocspwatch coordinator binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use ocspwatch_core::config::AppConfig;
use ocspwatch_server::refresh::spawn_scheduler;
use ocspwatch_server::{AppState, create_router};
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ENV_PREFIX: &str = "OCSPWATCH_";
const CONFIG_PATH_VAR: &str = "OCSPWATCH_CONFIG";

/// ocspwatch - OCSP responder-health coordinator
#[derive(Parser, Debug)]
#[command(name = "ocspwatchd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "OCSPWATCH_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with
/// `OCSPWATCH_`-prefixed environment variables (`__` separates sections).
fn load_config(config_path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = Path::new(config_path).exists();

    if has_config_file {
        tracing::info!(config_path = %config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::debug!("No config file found at {}", config_path);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with(ENV_PREFIX) && key != CONFIG_PATH_VAR);

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: ocspwatchd --config /path/to/config.toml\n  \
             2. Environment variables: OCSPWATCH_SERVER__BIND=0.0.0.0:8080 \
             OCSPWATCH_ADMIN__TOKEN_HASH=YOUR_TOKEN_HASH_HERE ocspwatchd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set OCSPWATCH_CONFIG to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ocspwatch v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    ocspwatch_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let metadata = ocspwatch_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("Metadata store initialized");

    let oracle =
        ocspwatch_oracle::from_config(&config.oracle).context("failed to initialize oracle")?;
    tracing::info!(
        base_url = %config.oracle.base_url,
        requests_per_second = config.oracle.requests_per_second,
        "Certificate oracle initialized"
    );

    let state = AppState::new(config.clone(), metadata, oracle);

    if let Some(interval) = state.refresh_interval() {
        spawn_scheduler(state.refresher.clone(), interval, config.refresh.top_n);
    } else {
        tracing::info!("Automatic refresh scheduling disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocspwatch_core::config::MetadataConfig;
    use tempfile::tempdir;

    #[test]
    fn load_config_from_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9090"
manifest_default_n = 5
manifest_max_n = 20

[metadata]
type = "sqlite"
path = "/tmp/ocspwatch-test.db"

[admin]
token_hash = "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"

[freshness]
stale_after_days = 3
accept_expired_when_not_current = false

[refresh]
auto_schedule_enabled = true
interval_secs = 600
"#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9090");
        assert_eq!(config.server.manifest_max_n, 20);
        assert!(matches!(config.metadata, MetadataConfig::Sqlite { .. }));
        assert_eq!(config.freshness.stale_after_days, 3);
        assert!(!config.freshness.accept_expired_when_not_current);
        assert_eq!(config.refresh.interval_secs, 600);
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
manifest_default_n = 50
manifest_max_n = 10

[admin]
token_hash = "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
"#,
        )
        .unwrap();

        let err = load_config(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn load_config_requires_admin_section() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1:1\"\n").unwrap();

        assert!(load_config(path.to_str().unwrap()).is_err());
    }
}
