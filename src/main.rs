use Lipwa_backend::api::orders::{handle_receipt, handle_status_event};
use Lipwa_backend::api::webhooks::{handle_resend, handle_webhook};
use Lipwa_backend::api::AppState;
use Lipwa_backend::config::AppConfig;
use Lipwa_backend::logging::init_tracing;
use Lipwa_backend::mpesa::c2b::C2bClient;
use Lipwa_backend::mpesa::http::MpesaHttpClient;
use Lipwa_backend::mpesa::stk::{DebugStore, StkClient};
use Lipwa_backend::mpesa::tenant::StaticTenantResolver;
use Lipwa_backend::mpesa::token::{HttpTokenFetcher, TokenCache};
use Lipwa_backend::mpesa::CallbackUrls;
use Lipwa_backend::orders::InMemoryOrderGateway;
use Lipwa_backend::services::notifier::LogNotifier;
use Lipwa_backend::services::reconciliation::ReconciliationEngine;
use Lipwa_backend::services::reversal::ReversalService;

use axum::routing::{any, get, post};
use axum::{Json, Router};
use http::HeaderName;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Graceful shutdown signal handler
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

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.gateway.env,
        "🚀 Starting Lipwa gateway service"
    );

    let http = MpesaHttpClient::new(Duration::from_secs(config.gateway.request_timeout_secs))?;
    let tokens = Arc::new(TokenCache::new(Arc::new(HttpTokenFetcher::new(
        http.clone(),
    ))));
    let urls = CallbackUrls::new(config.server.public_base_url.clone());
    let debug = Arc::new(DebugStore::new());
    let stk = Arc::new(StkClient::new(
        http.clone(),
        tokens.clone(),
        urls.clone(),
        debug.clone(),
    ));
    let c2b = Arc::new(C2bClient::new(
        http,
        tokens.clone(),
        urls,
        config.gateway.cert_dir.clone(),
    ));

    let orders = Arc::new(InMemoryOrderGateway::new());
    let engine = Arc::new(ReconciliationEngine::new(
        orders.clone(),
        Arc::new(LogNotifier),
    ));
    let reversal = Arc::new(ReversalService::new(c2b.clone(), orders.clone()));
    let resolver = Arc::new(StaticTenantResolver::new(config.gateway.default_tenant()));

    let state = AppState {
        resolver,
        stk,
        c2b,
        engine,
        reversal,
        orders,
        debug,
        reversal_statuses: config.gateway.reversal_statuses.clone(),
    };

    let request_id = HeaderName::from_static("x-request-id");
    let app = Router::new()
        .route("/health", get(health))
        .route("/lipwa", any(handle_webhook))
        .route("/lipwa/request", post(handle_resend))
        .route("/lipwa/receipt", get(handle_receipt))
        .route("/events/order-status", post(handle_status_event))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id)),
        );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "✅ Webhook surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
