//! OpenCore Engine - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opencore_engine::api::{self, ApiState};
use opencore_engine::config::{load_dotenv_from_repo_root, EngineConfig};
use opencore_engine::infrastructure::{
    audit::SqliteAuditLog, clock::SystemClock, openai::OpenAiClient, ports::ClockPort,
    responses::SqliteResponseInbox,
};
use opencore_engine::orchestrator::{LlmOrchestrator, PolicyResolver, SchemaRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root.
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opencore_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting OpenCore Engine");

    let config = EngineConfig::from_env();
    tracing::info!(?config, "Configuration loaded");
    if config.enabled && config.api_key.is_empty() {
        tracing::warn!("GPT_ENABLED is set but GPT_API_KEY is empty; requests will fail");
    }

    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());
    let audit = Arc::new(SqliteAuditLog::new(&config.audit_db).await?);
    let inbox = Arc::new(SqliteResponseInbox::new(&config.audit_db, clock.clone()).await?);
    let llm = Arc::new(OpenAiClient::new(
        &config.api_url,
        &config.api_key,
        &config.model,
        config.temperature,
    ));
    let policies = Arc::new(PolicyResolver::from_dir(&config.policy_dir)?);
    tracing::info!(policies = ?policies.names(), "Policy templates available");

    let engine = Arc::new(LlmOrchestrator::new(
        config.orchestrator(),
        llm,
        audit.clone(),
        clock,
        policies,
        Arc::new(SchemaRegistry::builtin()),
    ));
    let scheduler = engine.start();

    let router = api::routes()
        .with_state(ApiState {
            engine: engine.clone(),
            audit,
            inbox,
        })
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_addr().parse()?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("Shutting down");
    engine.shutdown().await;
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }

    Ok(())
}
