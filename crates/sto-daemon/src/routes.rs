//! Axum router and all HTTP handlers for sto-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use sto_sale::{ErrorClass, PurchaseRequest, SaleError};
use sto_schemas::InvestorId;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{
        AdminAck, ErrorResponse, FinalizeResponse, HealthResponse, LimitOverrideRequest,
        RateUpdateRequest, StatusResponse, WhitelistRequest,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/sale/status", get(status_handler))
        .route("/v1/sale/tiers", get(tiers))
        .route("/v1/sale/investors/:investor", get(investor))
        .route("/v1/sale/preview", post(preview))
        .route("/v1/sale/purchase", post(purchase))
        .route("/v1/sale/pending", get(pending))
        .route("/v1/sale/purchases/:purchase_id/retry", post(retry))
        .route("/v1/admin/pause", post(admin_pause))
        .route("/v1/admin/unpause", post(admin_unpause))
        .route("/v1/admin/finalize", post(admin_finalize))
        .route("/v1/admin/whitelist", post(admin_whitelist))
        .route("/v1/admin/rates", post(admin_rates))
        .route("/v1/admin/limit-override", post(admin_limit_override))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn status_for(e: &SaleError) -> StatusCode {
    match e {
        SaleError::DuplicatePurchase { .. } => StatusCode::CONFLICT,
        SaleError::UnknownPurchase { .. } => StatusCode::NOT_FOUND,
        SaleError::NotWhitelisted { .. } => StatusCode::FORBIDDEN,
        _ => match e.kind() {
            ErrorClass::InputValidation => StatusCode::BAD_REQUEST,
            ErrorClass::Capacity | ErrorClass::Lifecycle => StatusCode::CONFLICT,
            ErrorClass::Infrastructure => StatusCode::SERVICE_UNAVAILABLE,
        },
    }
}

fn error_response(status: StatusCode, error: &str, message: String, retryable: bool) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message,
            retryable,
        }),
    )
        .into_response()
}

fn sale_error(e: SaleError) -> Response {
    error_response(status_for(&e), e.code(), e.to_string(), e.is_retryable())
}

/// Admin routes need `Authorization: Bearer <token>`; with no token
/// configured they are refused outright.
fn require_admin(st: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(token) = &st.admin_token else {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "ADMIN_DISABLED",
            "no admin token configured".to_string(),
            false,
        ));
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    if token.matches(presented) {
        Ok(())
    } else {
        warn!("admin request rejected: bad or missing bearer token");
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid bearer token".to_string(),
            false,
        ))
    }
}

fn ack(st: &AppState) -> Response {
    (
        StatusCode::OK,
        Json(AdminAck {
            ok: true,
            version: st.sale.version(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// Sale reads
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = st.sale.stats();
    let _ = st.bus.send(BusMsg::Status {
        stats: stats.clone(),
    });
    (
        StatusCode::OK,
        Json(StatusResponse {
            config_hash: st.config_hash.clone(),
            stats,
        }),
    )
}

pub(crate) async fn tiers(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.sale.tiers()))
}

pub(crate) async fn investor(
    State(st): State<Arc<AppState>>,
    Path(investor): Path<String>,
) -> Response {
    let id = InvestorId::new(investor);
    match st.sale.investor(&id) {
        Some(state) => (StatusCode::OK, Json(state)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "UNKNOWN_INVESTOR",
            format!("{id} has not invested"),
            false,
        ),
    }
}

pub(crate) async fn pending(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.sale.pending_settlements()))
}

// ---------------------------------------------------------------------------
// Purchases
// ---------------------------------------------------------------------------

pub(crate) async fn preview(
    State(st): State<Arc<AppState>>,
    Json(req): Json<PurchaseRequest>,
) -> Response {
    match st.sale.preview(&req) {
        Ok(plan) => (StatusCode::OK, Json(plan)).into_response(),
        Err(e) => sale_error(e),
    }
}

pub(crate) async fn purchase(
    State(st): State<Arc<AppState>>,
    Json(req): Json<PurchaseRequest>,
) -> Response {
    match st.sale.purchase(req) {
        Ok(receipt) => {
            info!(purchase_id = %receipt.purchase_id, "sale/purchase");
            (StatusCode::OK, Json(receipt)).into_response()
        }
        Err(e) => sale_error(e),
    }
}

pub(crate) async fn retry(
    State(st): State<Arc<AppState>>,
    Path(purchase_id): Path<Uuid>,
) -> Response {
    match st.sale.retry_settlement(purchase_id) {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => sale_error(e),
    }
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

pub(crate) async fn admin_pause(State(st): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(r) = require_admin(&st, &headers) {
        return r;
    }
    match st.sale.pause() {
        Ok(()) => {
            info!("admin/pause");
            ack(&st)
        }
        Err(e) => sale_error(e),
    }
}

pub(crate) async fn admin_unpause(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(r) = require_admin(&st, &headers) {
        return r;
    }
    match st.sale.unpause() {
        Ok(()) => {
            info!("admin/unpause");
            ack(&st)
        }
        Err(e) => sale_error(e),
    }
}

pub(crate) async fn admin_finalize(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(r) = require_admin(&st, &headers) {
        return r;
    }
    match st.sale.finalize() {
        Ok(unsold_tokens) => (
            StatusCode::OK,
            Json(FinalizeResponse {
                ok: true,
                unsold_tokens,
                version: st.sale.version(),
            }),
        )
            .into_response(),
        Err(e) => sale_error(e),
    }
}

pub(crate) async fn admin_whitelist(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<WhitelistRequest>,
) -> Response {
    if let Err(r) = require_admin(&st, &headers) {
        return r;
    }
    if req.allowed {
        st.compliance.allow(req.investor.clone(), req.class);
    } else {
        st.compliance.revoke(&req.investor);
    }
    info!(investor = %req.investor, allowed = req.allowed, "admin/whitelist");
    let _ = st.bus.send(BusMsg::LogLine {
        level: "INFO".to_string(),
        msg: format!("whitelist {} allowed={}", req.investor, req.allowed),
    });
    ack(&st)
}

pub(crate) async fn admin_rates(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RateUpdateRequest>,
) -> Response {
    if let Err(r) = require_admin(&st, &headers) {
        return r;
    }
    if req.numerator == 0 || req.denominator == 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_RATE",
            "numerator and denominator must be > 0".to_string(),
            false,
        );
    }
    let rate = sto_rates::Rate::new(req.numerator, req.denominator, st.clock.now());
    info!(currency = %req.currency, as_of = %rate.as_of, "admin/rates");
    st.rates.set(req.currency, rate);
    ack(&st)
}

pub(crate) async fn admin_limit_override(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LimitOverrideRequest>,
) -> Response {
    if let Err(r) = require_admin(&st, &headers) {
        return r;
    }
    match st.sale.set_limit_override(req.investor, req.limit) {
        Ok(()) => ack(&st),
        Err(e) => sale_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status { .. } => "status",
                    BusMsg::Sale { .. } => "sale",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
