use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use dte_contingency::authority::http::HaciendaClient;
use dte_contingency::company::CredentialStore;
use dte_contingency::config::Config;
use dte_contingency::contingency::{Collaborators, ContingencyService};
use dte_contingency::db::{PgBusinessDocuments, PgCompanyDirectory, PgCredentialStore, PgStore};
use dte_contingency::signer::http::FirmadorClient;
use dte_contingency::state::AppState;
use dte_contingency::worker::Orchestrator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env().expect("Failed to load configuration");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting DTE contingency service");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations applied");

    let credentials: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(
        pool.clone(),
        config.encryption_key.clone(),
    ));
    let authority = HaciendaClient::new(config.hacienda.clone(), credentials.clone())?;
    let signer = FirmadorClient::new(&config.firmador.url, config.firmador.timeout)?;

    let service = Arc::new(ContingencyService::new(
        Collaborators {
            store: Arc::new(PgStore::new(pool.clone())),
            documents: Arc::new(PgBusinessDocuments::new(pool.clone())),
            directory: Arc::new(PgCompanyDirectory::new(pool.clone())),
            credentials,
            signer: Arc::new(signer),
            authority: Arc::new(authority),
        },
        config.pipeline.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = Orchestrator::new(service.clone(), config.schedule.clone()).start(shutdown_rx);

    let state = Arc::new(AppState {
        service,
        admin_token: config.admin_token.clone(),
    });

    let addr = SocketAddr::new(config.host, config.port);
    let app = dte_contingency::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    workers.join().await;
    tracing::info!("Contingency workers stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
