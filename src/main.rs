//! social-gate server
//! Loads configuration, opens the store, builds the auth pipeline, and serves `/v1`.

use anyhow::{Context, Result};
use clap::Parser;
use social_gate::{
    api::{self, AppState},
    auth::{credentials::OperatorCredentials, AuthPipeline, JwtHandler},
    cache::{MemoryUserCache, UserCache},
    config::AppConfig,
    identity::{IdentityResolver, RoleCatalog},
    middleware::rate_limit::{self, RateLimiter},
    store::SqliteStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "social-gate", version, about = "Authorization gateway for the social API")]
struct Args {
    /// Listen address, overrides ADDR
    #[arg(long, env = "ADDR")]
    addr: Option<String>,

    /// SQLite database path, overrides DB_PATH
    #[arg(long, env = "DB_PATH")]
    db_path: Option<String>,

    /// Insert the reference roles and a demo account before serving
    #[arg(long)]
    seed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::from_env();
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(path) = args.db_path {
        config.db.path = path;
    }

    init_tracing();
    info!(env = %config.env, addr = %config.addr, "Starting social-gate");

    let store = Arc::new(SqliteStore::open(&config.db)?);
    if args.seed {
        seed(&store).await?;
    }

    let cache: Option<Arc<dyn UserCache>> = if config.cache.enabled {
        info!(ttl_secs = config.cache.ttl.as_secs(), "Identity cache enabled");
        Some(Arc::new(MemoryUserCache::new(config.cache.ttl)))
    } else {
        None
    };

    let limiter = rate_limit::from_config(&config.rate_limit);
    if config.rate_limit.enabled {
        info!(
            requests = config.rate_limit.requests_per_window,
            window_secs = config.rate_limit.window.as_secs(),
            "Rate limiter enabled"
        );
        tokio::spawn(rate_limit_cleanup(limiter.clone(), config.rate_limit.window));
    } else {
        warn!("Rate limiter disabled");
    }

    let pipeline = AuthPipeline::new(
        Arc::new(JwtHandler::new(config.auth.token.clone())),
        IdentityResolver::new(store.clone(), cache, config.cache.op_timeout),
        RoleCatalog::new(store.clone()),
        limiter,
        OperatorCredentials::new(&config.auth.basic),
    );

    let state = AppState {
        pipeline: Arc::new(pipeline),
        users: store.clone(),
        posts: store,
        token_config: config.auth.token.clone(),
        env: config.env.clone(),
    };
    let app = api::router(state, config.request_timeout);

    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.addr))?;
    info!("API server listening on {}", config.addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Reference roles plus one account per role.
async fn seed(store: &SqliteStore) -> Result<()> {
    store
        .seed_defaults()
        .await
        .context("Failed to seed roles")?;

    for (username, role) in [("demo", "user"), ("demo-moderator", "moderator"), ("demo-admin", "admin")] {
        let email = format!("{}@example.com", username);
        match store.create_user(username, &email, "password", role).await {
            Ok(user) => info!(user_id = user.id, %email, "Seeded account"),
            Err(e) => warn!(%email, error = %e, "Seed account not created"),
        }
    }
    Ok(())
}

async fn rate_limit_cleanup(limiter: Arc<dyn RateLimiter>, window: Duration) {
    let mut ticker = tokio::time::interval(window.max(Duration::from_secs(1)));
    loop {
        ticker.tick().await;
        limiter.cleanup();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "social_gate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
