use clap::Parser;
use dotenvy::dotenv;
use file_lambda_bridge::config::{LambdaConfig, LogFormat};
use file_lambda_bridge::infrastructure::{database, lambda, storage};
use file_lambda_bridge::services::authenticator::CallbackAuthenticator;
use file_lambda_bridge::services::dispatcher::{LambdaDispatcher, StaticDispatchResolver};
use file_lambda_bridge::services::orm_store::OrmStore;
use file_lambda_bridge::services::records::RecordRegistry;
use file_lambda_bridge::services::registry::FunctionRegistry;
use file_lambda_bridge::services::worker::PromoteWorker;
use file_lambda_bridge::{AppState, create_app};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pending promotions buffered between the API and the worker.
const PROMOTE_QUEUE_CAPACITY: usize = 100;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment, configuration & logging
    dotenv().ok();
    let args = Args::parse();
    let config = Arc::new(LambdaConfig::from_env()?);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_filter().into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_formatter {
        LogFormat::Full => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }

    info!("🚀 Starting File Lambda Bridge...");
    info!(
        "🛡️  Callback: {} (validate params={}, fallback secret={})",
        config.callback_url, config.validate_params, config.allow_fallback_secret
    );

    // 2. Infrastructure
    let db = database::setup_database().await?;
    let storages = storage::setup_storages()?;
    let client = lambda::setup_lambda_client(&config).await;

    let function_registry = Arc::new(FunctionRegistry::new(client.clone()));
    match function_registry.list_functions(false).await {
        Ok(functions) => info!("λ {} functions available", functions.len()),
        Err(e) => warn!("⚠️ Could not list Lambda functions yet: {}", e),
    }

    let record_types = env::var("RECORD_TYPES").unwrap_or_else(|_| "User".to_string());
    let records = record_types
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .fold(RecordRegistry::new(), |records, record_type| {
            info!("🗂️  Record type: {}", record_type);
            records.register(record_type, Arc::new(OrmStore::new(db.clone(), record_type)))
        });

    let resolver = StaticDispatchResolver::new(env::var("DISPATCH_FUNCTION").ok());
    let mut dispatcher = LambdaDispatcher::new(
        config.clone(),
        storages,
        function_registry,
        client,
        Arc::new(resolver),
    );
    if let Ok(uploader) = env::var("UPLOADER_NAME") {
        dispatcher = dispatcher.with_uploader(uploader);
    }

    // 3. Promote worker
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (jobs_tx, jobs_rx) = mpsc::channel(PROMOTE_QUEUE_CAPACITY);

    let worker = PromoteWorker::new(Arc::new(dispatcher), records.clone(), jobs_rx, shutdown_rx);
    let worker_handle = tokio::spawn(worker.run());
    info!("👷 Promote worker initialized.");

    // 4. API
    let state = AppState {
        db,
        config: config.clone(),
        authenticator: CallbackAuthenticator::new(config, records),
        jobs: jobs_tx,
    };

    let trace_layer = TraceLayer::new_for_http()
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
    info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", args.port);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server runtime error: {}", e);
    }

    // 5. Stop the worker once the server has drained
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;

    info!("👋 Bridge exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("❌ Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
