//! Parley server entry point

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use parley_config::{load_settings_from, Settings};
use parley_server::{build_services, create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env} > config/default > defaults
    let env = std::env::var("PARLEY_ENV").ok();
    let config = load_config(Path::new("config"), env.as_deref())?;

    init_tracing(&config);

    tracing::info!("Starting parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        max_sessions = config.server.max_sessions,
        public_url = config.server.public_url.as_deref().unwrap_or("<from Host header>"),
        "Configuration loaded"
    );

    let services = build_services(&config).context("building capability clients")?;
    let mut state = AppState::new(config.clone(), services);

    if config.observability.metrics_enabled {
        match init_metrics() {
            Ok(handle) => {
                tracing::info!("Prometheus metrics at /metrics");
                state = state.with_metrics(handle);
            }
            Err(e) => tracing::warn!(error = %e, "Metrics disabled"),
        }
    }

    if state.twilio.is_none() {
        tracing::info!("Twilio credentials not set; outbound calls disabled");
    }

    let sessions = state.sessions.clone();
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server.host")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open media streams hold their connections until their sessions end
            let cancelled = sessions.cancel_all();
            tracing::info!(cancelled, "Cancelled live sessions");
        })
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Load and validate settings; an invalid configuration stops startup
fn load_config(dir: &Path, env: Option<&str>) -> anyhow::Result<Settings> {
    load_settings_from(dir, env).with_context(|| {
        format!("loading configuration (env: {})", env.unwrap_or("default"))
    })
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("parley={},tower_http=debug", level).into()
    });

    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_stops_startup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("production.toml"),
            "environment = \"production\"\n[audio]\noutput_sample_rate = 16000\n",
        )
        .unwrap();

        let err = load_config(dir.path(), Some("production")).unwrap_err();
        assert!(err.to_string().contains("env: production"));
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_config(dir.path(), None).unwrap();
        assert_eq!(settings.server.port, 8765);
    }
}
