use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chatwave_server::api::{self, AppState};
use chatwave_server::auth::TokenTable;
use chatwave_server::config::ServerConfig;
use chatwave_server::gateway::Gateway;
use chatwave_server::rate_limit::RateLimiter;
use chatwave_server::store::SqliteMessageStore;

const LIMITER_IDLE: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chatwave_server=debug")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Chatwave server starting");

    // Configuration
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        database = %config.database_path.display(),
        tokens = config.auth_tokens.len(),
        queue = config.session_queue_capacity,
        send_rate = config.send_rate_per_sec,
        "Configuration loaded"
    );
    if config.auth_tokens.is_empty() {
        warn!("AUTH_TOKENS is empty, every connection will be refused");
    }

    // Gateway and its collaborators
    let store = SqliteMessageStore::open(&config.database_path)?;
    let tokens = TokenTable::from_map(&config.auth_tokens);
    let gateway = Gateway::new(Arc::new(store), Arc::new(tokens.clone()), &config);
    let http_limiter = RateLimiter::default();

    // Housekeeping: idle limiter buckets and expired tokens.
    {
        let http_limiter = http_limiter.clone();
        let send_limiter = gateway.send_limiter().clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(300));
            loop {
                tick.tick().await;
                let purged = http_limiter.purge_idle(LIMITER_IDLE).await
                    + send_limiter.purge_idle(LIMITER_IDLE).await;
                if purged > 0 {
                    info!(purged, "Dropped idle rate-limit buckets");
                }
                tokens.purge_expired().await;
            }
        });
    }

    let state = AppState {
        gateway,
        rate_limiter: http_limiter,
        history_max_limit: config.history_max_limit,
    };

    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = result {
                error!(error = %e, "Server stopped with an error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    Ok(())
}
