use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use calendar_events_api::config::Config;
use calendar_events_api::dispatch::Dispatcher;
use calendar_events_api::handlers;
use calendar_events_api::repository::PgEventRepository;
use calendar_events_api::routes::create_routes;
use calendar_events_api::spec::{JsonSchemaValidator, SpecStore, Validator};
use calendar_events_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url())
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let spec = Arc::new(SpecStore::new(&config.spec_path));
    let doc = spec.load().expect("Failed to load the OpenAPI contract");
    let validator: Arc<dyn Validator> = Arc::new(JsonSchemaValidator::new(doc));

    let repo = PgEventRepository::new(pool.clone(), &spec, validator)
        .expect("The OpenAPI contract is missing the Event schema");

    let state = AppState {
        repo: Arc::new(repo),
        spec,
    };
    let dispatcher = Dispatcher::from_contract(state, handlers::registry())
        .expect("Failed to build the dispatch table from the contract");

    let app: Router = create_routes(Arc::new(dispatcher), &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed");

    // Listener closed and in-flight requests drained; release the pool.
    pool.close().await;
    tracing::info!("Connection pool closed, exiting");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining in-flight requests");
}
