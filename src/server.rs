/// Server setup and initialization
///
/// Wires together storage, the flow registry, collaborators, the walker, the
/// idle-conversation sweeper and the HTTP routes.

use crate::{
    api::{self, AppState},
    collaborators::{guard::CallPolicy, Collaborators},
    config::Config,
    db,
    flow::FlowRegistry,
    runtime::{ConversationSweeper, ExecutionEngine, NodeExecutor},
};
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Running application: the router plus the background sweeper
pub struct App {
    pub router: Router,
    pub engine: Arc<ExecutionEngine>,
    pub sweeper: ConversationSweeper,
}

/// Initialize every component and build the router
pub async fn create_app(config: Config) -> Result<App> {
    tracing::info!("🏗️ Initializing database in {}", config.database.data_dir);
    let pool = db::connect(&config.database.data_dir).await?;
    let (flow_storage, conversation_store) = db::init_stores(&pool).await?;

    tracing::info!("📊 Initializing flow registry");
    let registry = Arc::new(FlowRegistry::new(flow_storage));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load flows from storage: {}", e))?;

    tracing::info!("⚙️ Initializing collaborators and node executor");
    let collaborators = Collaborators::from_config(&config.collaborators)?;
    let executor = Arc::new(NodeExecutor::new(
        collaborators,
        CallPolicy::from_config(&config.collaborators),
        config.collaborators.default_model.clone(),
    ));

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&registry),
        Arc::new(conversation_store),
        executor,
        config.engine.clone(),
    ));

    let sweeper = ConversationSweeper::new(Arc::clone(&engine))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize conversation sweeper: {}", e))?;

    tracing::info!("📡 Creating HTTP router");
    let router = api::router(AppState::new(Arc::clone(&engine)));

    tracing::info!("✅ Application initialized successfully");
    Ok(App {
        router,
        engine,
        sweeper,
    })
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("convoflow=info")),
        )
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting convoflow server...");

    let app = create_app(config.clone()).await?;
    app.sweeper.start().await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.sweeper.stop().await?;
    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
}
