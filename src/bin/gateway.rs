use std::sync::Arc;

use anyhow::{Context, Result};
use inspect_gateway::bots::transport::mock::MockTransport;
use inspect_gateway::config::GatewayConfig;
use inspect_gateway::core::{self, ShutdownHandle};
use inspect_gateway::db::AssetRepository;
use inspect_gateway::http::{self, AppState};
use inspect_gateway::inspect_service::InspectService;
use inspect_gateway::schema::ItemSchema;
use inspect_gateway::worker_manager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: gateway (configuration is read entirely from the environment)");
                return Ok(());
            }
            other => {
                eprintln!("Error: unrecognized argument {other:?}");
                return Ok(());
            }
        }
    }

    let config = GatewayConfig::from_env().context("loading gateway configuration")?;

    tracing::info!("[gateway] [fetching_schema] url={}", config.schema_url);
    let schema = ItemSchema::fetch(&config.schema_url).await.context("fetching item schema")?;

    let db = AssetRepository::connect(&config.database_url).await.context("connecting to database")?;
    db.migrate().await.context("running migrations")?;

    // The Steam/GC protocol itself is an explicit external collaborator
    // — this binary wires the dispatch core against
    // `MockTransport` until a real `GcTransport` adapter for a Steam client
    // crate is plugged in; nothing downstream of `GcTransport` depends on
    // which implementation it is.
    let worker_manager = worker_manager::spawn(&config, |_account| Arc::new(MockTransport::new()))
        .await
        .context("starting worker manager")?;

    let inspect_service = InspectService::new(worker_manager.clone(), db, schema, &config);
    let state = Arc::new(AppState { inspect_service, worker_manager: worker_manager.clone() });

    let shutdown = ShutdownHandle::new();
    tokio::spawn(core::listen_for_signals(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("binding {}", config.http_bind))?;
    tracing::info!("[gateway] [listening] addr={}", config.http_bind);

    let router = http::router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .context("running http server")?;

    worker_manager.shutdown().await;
    tracing::info!("[gateway] [stopped]");
    Ok(())
}
