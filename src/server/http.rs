//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one spawned task per connection. Requests are
//! dispatched by method and path; the /api/v1/* route families consume the
//! request and answer themselves.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::billing::BillingProcessor;
use crate::config::Args;
use crate::db::MongoClient;
use crate::entitlements::{AccessLedger, InMemoryLedger, MongoAccessLedger};
use crate::logging::AnalyticsLogger;
use crate::reviews::ReviewStore;
use crate::routes::{self, BoxBody};
use crate::safety::SafetyService;
use crate::services::{SmsClient, SmsConfig};
use crate::types::{ConfiaError, Result};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: Option<MongoClient>,
    /// Session token validation (and dev-mode minting)
    pub jwt: JwtValidator,
    /// Free-allowance and credit ledger
    pub ledger: Arc<dyn AccessLedger>,
    /// Subject and review persistence
    pub store: Option<Arc<ReviewStore>>,
    /// Billing webhook processing
    pub billing: Option<Arc<BillingProcessor>>,
    /// Emergency alerts and safe date sessions
    pub safety: Option<Arc<SafetyService>>,
    /// JSONL analytics event log
    pub analytics: AnalyticsLogger,
}

impl AppState {
    /// Create AppState without MongoDB (dev mode). The ledger lives in
    /// memory and every storage-backed feature reports unavailable.
    pub fn new(args: Args) -> Result<Self> {
        let jwt = jwt_from_args(&args)?;
        let analytics = AnalyticsLogger::new(args.node_id.to_string());
        let ledger: Arc<dyn AccessLedger> = Arc::new(InMemoryLedger::new(args.free_query_limit));

        Ok(Self {
            args,
            mongo: None,
            jwt,
            ledger,
            store: None,
            billing: None,
            safety: None,
            analytics,
        })
    }

    /// Create AppState with MongoDB-backed services.
    pub async fn with_mongo(args: Args, mongo: MongoClient) -> Result<Self> {
        let jwt = jwt_from_args(&args)?;
        let analytics = AnalyticsLogger::new(args.node_id.to_string());
        let ledger: Arc<dyn AccessLedger> =
            Arc::new(MongoAccessLedger::new(&mongo, args.free_query_limit).await?);
        let store = Arc::new(ReviewStore::new(&mongo).await?);
        let billing = Arc::new(BillingProcessor::new(&mongo).await?);
        let sms = Arc::new(SmsClient::new(SmsConfig::from(&args.sms)));
        let safety = Arc::new(SafetyService::new(&mongo, sms).await?);

        Ok(Self {
            args,
            mongo: Some(mongo),
            jwt,
            ledger,
            store: Some(store),
            billing: Some(billing),
            safety: Some(safety),
            analytics,
        })
    }
}

fn jwt_from_args(args: &Args) -> Result<JwtValidator> {
    let secret = args
        .jwt_secret()
        .ok_or_else(|| ConfiaError::Config("JWT secret is not configured".to_string()))?;
    Ok(JwtValidator::new(&secret, args.jwt_expiry_seconds))
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Confia listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - dev token endpoint active");
    }
    if state.mongo.is_none() {
        warn!("Running without MongoDB - reviews, billing and safety report unavailable");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    // Route families consume the request; the prefix check here keeps the
    // request alive for later arms when the family declines it.
    if path.starts_with("/api/v1/reviews") {
        if let Some(response) = routes::handle_review_request(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(routes::not_found("Not found"));
    }
    if path.starts_with("/api/v1/subjects") {
        if let Some(response) = routes::handle_subject_request(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(routes::not_found("Not found"));
    }
    if path.starts_with("/api/v1/access") {
        if let Some(response) = routes::handle_access_request(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(routes::not_found("Not found"));
    }
    if path.starts_with("/api/v1/safety") {
        if let Some(response) = routes::handle_safety_request(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(routes::not_found("Not found"));
    }

    let response = match (method, path.as_str()) {
        // Liveness probe - 200 whenever the process is up
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(Arc::clone(&state)))
        }

        // Readiness probe - 200 only once storage is usable
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            to_boxed(routes::readiness_check(Arc::clone(&state)))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => to_boxed(routes::version_info()),

        // Billing provider deliveries
        (Method::POST, "/webhooks/billing") => {
            routes::handle_billing_webhook(req, Arc::clone(&state)).await
        }

        // Dev-mode session token minting
        (Method::POST, "/dev/token") => routes::handle_dev_token(req, Arc::clone(&state)).await,

        // CORS preflight
        (Method::OPTIONS, _) => routes::cors_preflight(),

        // Not found
        _ => routes::not_found(&format!("No route for {}", path)),
    };

    Ok(response)
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}
