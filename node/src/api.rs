//! # REST + WebSocket API
//!
//! Builds the axum router over one [`Wallet`]. Every handler goes through
//! the wallet facade; wallet errors map to HTTP status by [`ErrorKind`].
//!
//! ## Endpoints
//!
//! | Method | Path              | Description                           |
//! |--------|-------------------|---------------------------------------|
//! | GET    | `/health`         | Liveness probe                        |
//! | GET    | `/status`         | Wallet status and balances            |
//! | GET    | `/mints`          | Registered mints                      |
//! | POST   | `/mints`          | Register a mint                       |
//! | POST   | `/mints/remove`   | Unregister an empty mint              |
//! | GET    | `/transactions`   | Recent log entries (`?limit=`)        |
//! | POST   | `/send`           | Send ecash, returns the bundle        |
//! | POST   | `/receive`        | Redeem a bundle                       |
//! | POST   | `/pay`            | Pay a BOLT-11 invoice                 |
//! | POST   | `/zap`            | Zap an event                          |
//! | POST   | `/nutzap`         | Send a nutzap                         |
//! | POST   | `/swap`           | Consolidate a mint's tokens           |
//! | GET    | `/invoices`       | Invoices awaiting settlement          |
//! | POST   | `/invoices`       | Request an invoice                    |
//! | POST   | `/notices`        | Deliver a payment notice              |
//! | GET    | `/ws`             | Live wallet events                    |
//!
//! | ErrorKind    | HTTP status |
//! |--------------|-------------|
//! | `validation` | 400         |
//! | `funds`      | 402         |
//! | `conflict`   | 409         |
//! | `network`    | 502         |
//! | `state`      | 503         |
//! | `storage`    | 500         |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tally_wallet::book::WalletState;
use tally_wallet::receipts::PaymentNotice;
use tally_wallet::{ErrorKind, Wallet, WalletError, WalletStatus};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub wallet: Wallet,
    /// Feeds the wallet's payment listener.
    pub notices: mpsc::Sender<PaymentNotice>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the API router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/mints", get(list_mints).post(add_mint))
        .route("/mints/remove", post(remove_mint))
        .route("/transactions", get(list_transactions))
        .route("/send", post(send_handler))
        .route("/receive", post(receive_handler))
        .route("/pay", post(pay_handler))
        .route("/zap", post(zap_handler))
        .route("/nutzap", post(nutzap_handler))
        .route("/swap", post(swap_handler))
        .route("/invoices", get(list_invoices).post(create_invoice))
        .route("/notices", post(notice_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A wallet error rendered as JSON.
pub struct ApiError(WalletError);

impl From<WalletError> for ApiError {
    fn from(e: WalletError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: ErrorKind,
    pub retryable: bool,
    /// Set when a bundle was only partly received: what was applied, and
    /// the unredeemed part to retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<tally_wallet::wallet::ReceiveReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remainder: Option<String>,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Funds => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Network => StatusCode::BAD_GATEWAY,
        ErrorKind::State => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, ?kind, "request failed");
        }
        let (received, remainder) = match &self.0 {
            WalletError::PartialReceive {
                receipt, remainder, ..
            } => (Some(receipt.clone()), Some(remainder.clone())),
            _ => (None, None),
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            kind,
            retryable: self.0.is_retryable(),
            received,
            remainder,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request & Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub owner: String,
    pub status: WalletStatus,
    #[serde(flatten)]
    pub state: WalletState,
    pub active_monitors: usize,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct MintRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub amount: u64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    pub invoice: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ZapRequest {
    pub event_id: String,
    pub amount: u64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NutzapRequest {
    pub recipient: String,
    pub amount: u64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    pub amount: u64,
    #[serde(default)]
    pub description: String,
    /// Registered mint to issue from; the default mint when omitted.
    #[serde(default)]
    pub mint: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let wallet = &state.wallet;
    Json(StatusResponse {
        version: state.version.clone(),
        owner: wallet.owner().to_string(),
        status: wallet.status(),
        state: wallet.state(),
        active_monitors: wallet.active_monitors(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn list_mints(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.wallet.mints())
}

async fn add_mint(
    State(state): State<AppState>,
    Json(req): Json<MintRequest>,
) -> ApiResult<tally_wallet::registry::Mint> {
    Ok(Json(state.wallet.add_mint(&req.url).await?))
}

async fn remove_mint(
    State(state): State<AppState>,
    Json(req): Json<MintRequest>,
) -> ApiResult<tally_wallet::registry::Mint> {
    Ok(Json(state.wallet.remove_mint(&req.url).await?))
}

async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> impl IntoResponse {
    Json(state.wallet.transactions(query.limit))
}

async fn send_handler(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> ApiResult<tally_wallet::wallet::SendReceipt> {
    Ok(Json(state.wallet.send_ecash(req.amount, req.comment).await?))
}

async fn receive_handler(
    State(state): State<AppState>,
    Json(req): Json<ReceiveRequest>,
) -> ApiResult<tally_wallet::wallet::ReceiveReceipt> {
    Ok(Json(state.wallet.receive_ecash(&req.token).await?))
}

async fn pay_handler(
    State(state): State<AppState>,
    Json(req): Json<PayRequest>,
) -> ApiResult<tally_wallet::wallet::PaymentResult> {
    Ok(Json(state.wallet.pay_invoice(&req.invoice, req.comment).await?))
}

async fn zap_handler(
    State(state): State<AppState>,
    Json(req): Json<ZapRequest>,
) -> ApiResult<tally_wallet::wallet::SendReceipt> {
    Ok(Json(
        state
            .wallet
            .zap_event(&req.event_id, req.amount, req.comment)
            .await?,
    ))
}

async fn nutzap_handler(
    State(state): State<AppState>,
    Json(req): Json<NutzapRequest>,
) -> ApiResult<tally_wallet::wallet::SendReceipt> {
    Ok(Json(
        state
            .wallet
            .send_nutzap(&req.recipient, req.amount, req.comment)
            .await?,
    ))
}

async fn swap_handler(
    State(state): State<AppState>,
    Json(req): Json<MintRequest>,
) -> ApiResult<tally_wallet::Transaction> {
    Ok(Json(state.wallet.swap_tokens(&req.url).await?))
}

async fn list_invoices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.wallet.pending_invoices())
}

async fn create_invoice(
    State(state): State<AppState>,
    Json(req): Json<InvoiceRequest>,
) -> ApiResult<tally_wallet::settlement::PendingInvoice> {
    let invoice = match req.mint {
        Some(mint) => {
            state
                .wallet
                .generate_invoice_at(&mint, req.amount, &req.description)
                .await?
        }
        None => {
            state
                .wallet
                .generate_invoice(req.amount, &req.description)
                .await?
        }
    };
    Ok(Json(invoice))
}

/// Queues a notice for the payment listener. Answers `202` once queued.
async fn notice_handler(
    State(state): State<AppState>,
    Json(notice): Json<PaymentNotice>,
) -> impl IntoResponse {
    match state.notices.send(notice).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "payment listener stopped" })),
        )
            .into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards wallet events to one WebSocket client until either side
/// closes.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.wallet.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize ws event");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "ws subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    // Push-only channel.
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
