use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use regnum_realtime_server::config::{GameConfig, ServerConfig};
use regnum_realtime_server::game::world::WorldData;
use regnum_realtime_server::metrics::{self, Metrics};
use regnum_realtime_server::net::auth::Authenticator;
use regnum_realtime_server::net::game_session::{unix_millis, GameSession};
use regnum_realtime_server::net::transport::{ServerContext, WebTransportServer};
use regnum_realtime_server::persistence::bridge::PersistenceBridge;
use regnum_realtime_server::persistence::memory::MemoryStore;
use regnum_realtime_server::persistence::store::CharacterStore;

/// Pick the durable store: MySQL when configured, in-memory otherwise
async fn open_store(
    config: &ServerConfig,
) -> anyhow::Result<(Arc<dyn CharacterStore>, Arc<dyn Authenticator>)> {
    #[cfg(feature = "mysql")]
    if let Some(url) = &config.database_url {
        use regnum_realtime_server::persistence::mysql::MySqlStore;

        let store = Arc::new(MySqlStore::connect(url, config.database_max_connections).await?);
        let auth: Arc<dyn Authenticator> = store.clone();
        let store: Arc<dyn CharacterStore> = store;
        return Ok((store, auth));
    }

    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but the `mysql` feature is disabled");
    }
    warn!("Using the in-memory character store; state is lost on restart");
    let store = Arc::new(MemoryStore::new());
    let auth: Arc<dyn Authenticator> = store.clone();
    let store: Arc<dyn CharacterStore> = store;
    Ok((store, auth))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Regnum realtime server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate()?;
    let game_config = GameConfig::load_or_default();
    game_config.validate()?;
    info!(
        "Configuration loaded: {}:{}, max_sessions={}, tick={}ms",
        config.bind_address,
        config.port,
        config.max_sessions,
        game_config.tick_interval.as_millis()
    );

    let metrics = Arc::new(Metrics::new());

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let world = WorldData::load_or_default(config.world_data_path.as_deref());
    info!(
        "World loaded: {} NPCs, {} spawn points",
        world.npcs.len(),
        world.spawn_points.len()
    );

    let (store, auth) = open_store(&config).await?;
    let persistence = Arc::new(PersistenceBridge::new(store.clone(), metrics.clone()));
    let game_session = Arc::new(RwLock::new(GameSession::new(
        game_config,
        world,
        config.max_sessions,
        metrics.clone(),
    )));

    let context = ServerContext {
        game_session: game_session.clone(),
        auth,
        store,
        persistence: persistence.clone(),
        metrics: metrics.clone(),
    };
    let server = WebTransportServer::new(config.clone(), context).await?;

    info!("Server ready on https://{}", server.bind_addr());
    info!("Certificate hash: {}", server.cert_hash());

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    // Last reconciliation so no live state is lost
    let states = game_session.read().await.snapshot_states(unix_millis());
    if !states.is_empty() {
        let report = persistence.full_sync(states).await;
        info!(
            "Final sync: {} written, {} failed",
            report.written, report.failed
        );
    }
    info!("Server stopped");

    Ok(())
}
