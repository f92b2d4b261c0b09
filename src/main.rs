use std::sync::Arc;

use anyhow::Context;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use tradelink::accounts::LifecycleController;
use tradelink::config::{AppConfig, IdentityBackend};
use tradelink::guard::RouteGuard;
use tradelink::identity::{GoTrueClient, IdentityProvider, MemoryIdentityProvider};
use tradelink::session::CookieSettings;
use tradelink::store::{LibSqlBackend, ProfileStore};
use tradelink::web::{AppState, app_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Initialize tracing: stderr always, plus a daily file when configured.
    let (file_writer, _log_guard) = match config.log_dir.as_ref() {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "tradelink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_writer.map(|writer| fmt::layer().with_writer(writer).with_ansi(false)))
        .init();

    eprintln!("Tradelink v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Site: {}", config.lifecycle.site_url);

    // ── Database ─────────────────────────────────────────────────────────
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store: Arc<dyn ProfileStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Identity provider ────────────────────────────────────────────────
    let identity: Arc<dyn IdentityProvider> = match config.identity_backend {
        IdentityBackend::GoTrue => {
            let (Some(url), Some(key)) = (config.auth_url.clone(), config.auth_anon_key.clone())
            else {
                anyhow::bail!("GoTrue backend selected without TRADELINK_AUTH_URL and TRADELINK_AUTH_ANON_KEY");
            };
            Arc::new(GoTrueClient::new(url, key).context("Failed to build identity client")?)
        }
        IdentityBackend::Memory => {
            tracing::warn!("Using in-memory identity provider; accounts vanish on restart");
            Arc::new(
                MemoryIdentityProvider::new()
                    .with_provisioning_hook(Arc::clone(&store), config.lifecycle.profile_grace / 2),
            )
        }
    };
    eprintln!("   Identity: {}", identity.name());

    // ── HTTP ─────────────────────────────────────────────────────────────
    let controller = Arc::new(LifecycleController::new(
        Arc::clone(&identity),
        Arc::clone(&store),
        config.lifecycle.clone(),
    ));
    let guard = Arc::new(RouteGuard::new(
        Arc::clone(&identity),
        Arc::clone(&store),
        config.refresh_leeway,
    ));
    let app = app_routes(AppState {
        controller,
        guard,
        store,
        cookies: CookieSettings {
            secure: config.secure_cookies,
        },
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "HTTP server started");
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}
