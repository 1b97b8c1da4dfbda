mod api;

use std::{env, net::SocketAddr, sync::Arc};

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use invox_core::config::Config;
use invox_core::db::Database;
use invox_core::extract::{ExtractionService, GenaiLlmClient};
use invox_core::mailbox::{CandidateFinder, GmailClient};
use invox_core::oauth::store::ProviderSettings;
use invox_core::oauth::{ClientCredentials, TokenRepository, TokenService};
use invox_core::pipeline::IngestPipeline;
use invox_core::review::{AuditRepository, LibsqlLedgerWriter, ReviewItemRepository, ReviewWorkflow};
use invox_core::storage::DropboxConnector;
use invox_core::{init_telemetry, migrations, oauth};

#[derive(Clone)]
struct AppState {
    db: Database,
    config: Arc<Config>,
    tokens: Arc<TokenService>,
    finder: Arc<CandidateFinder>,
    pipeline: Arc<IngestPipeline>,
    workflow: Arc<ReviewWorkflow>,
    storage: Arc<DropboxConnector>,
    audit: AuditRepository,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = init_telemetry(&config.app, &config.telemetry)?;

    let db = Database::new(&config.paths.database).await?;
    migrations::run_migrations(&db).await?;

    let state = build_state(config, db);
    let port = state.config.app.port;
    let app = router(state);

    let shutdown = CancellationToken::new();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("invox listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    Ok(())
}

fn build_state(config: Config, db: Database) -> AppState {
    let config = Arc::new(config);
    let http = reqwest::Client::new();

    let tokens = Arc::new(TokenService::new(
        http.clone(),
        TokenRepository::new(db.clone()),
        ProviderSettings {
            credentials: credentials(&config.gmail.client_id, &config.gmail.client_secret),
            redirect_url: config.gmail.redirect_url.clone(),
            auth_endpoint: oauth::GOOGLE_AUTH_ENDPOINT.to_string(),
            token_endpoint: oauth::GOOGLE_TOKEN_ENDPOINT.to_string(),
            static_access_token: None,
        },
        ProviderSettings {
            credentials: credentials(&config.dropbox.app_key, &config.dropbox.app_secret),
            redirect_url: config.dropbox.redirect_url.clone(),
            auth_endpoint: oauth::DROPBOX_AUTH_ENDPOINT.to_string(),
            token_endpoint: oauth::DROPBOX_TOKEN_ENDPOINT.to_string(),
            static_access_token: config.dropbox.access_token.clone(),
        },
    ));

    let mail = Arc::new(GmailClient::new(http.clone(), tokens.clone()));
    let storage = Arc::new(DropboxConnector::new(http, tokens.clone()));
    let extractor = Arc::new(ExtractionService::new(
        Arc::new(GenaiLlmClient::new(&config.model)),
        &config.model,
    ));

    let reviews = ReviewItemRepository::new(db.clone());
    let audit = AuditRepository::new(db.clone());
    let ledger = Arc::new(LibsqlLedgerWriter::new(db.clone()));

    let finder = Arc::new(CandidateFinder::new(mail.clone()));
    let pipeline = Arc::new(IngestPipeline::new(
        mail,
        storage.clone(),
        extractor,
        reviews.clone(),
        config.dropbox.upload_folder.clone(),
    ));
    let workflow = Arc::new(ReviewWorkflow::new(reviews, audit.clone(), ledger));

    AppState {
        db,
        config,
        tokens,
        finder,
        pipeline,
        workflow,
        storage,
        audit,
    }
}

fn credentials(client_id: &str, client_secret: &str) -> Option<ClientCredentials> {
    if client_id.is_empty() || client_secret.is_empty() {
        return None;
    }
    Some(ClientCredentials {
        client_id: client_id.to_string(),
        client_secret: client_secret.to_string(),
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api::router())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    database: String,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_status = match state.db.health_check().await {
        Ok(_) => "ok",
        Err(_) => "unhealthy",
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if db_status == "ok" {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: db_status.to_string(),
        }),
    )
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, shutting down");
        }
        _ = terminate => {
            warn!("received terminate signal, shutting down");
        }
    }

    shutdown.cancel();
}
