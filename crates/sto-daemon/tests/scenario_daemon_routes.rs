//! In-process scenario tests for sto-daemon HTTP endpoints.
//!
//! These tests build the Axum router **without** binding a TCP socket and
//! drive it via `tower::ServiceExt::oneshot`. The sale clock is a
//! `ManualClock` so freshness and lifecycle can be steered.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use chrono::{Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sto_config::AdminToken;
use sto_daemon::{routes, state};
use sto_sale::memory::ManualClock;
use sto_sale::SaleEvent;
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TOKEN: &str = "test-admin-token";

const CONFIG: &str = r#"
sale:
  sale_id: "3c2b1a09-8f7e-4d6c-9b5a-4f3e2d1c0b9a"
  start_time: "2026-03-01T00:00:00Z"
  end_time: "2026-04-01T00:00:00Z"
  non_accredited_limit: "100"
  accepted_currencies: [USD, POLY]
  discount_currency: POLY
  settlement_destination: "escrow:daemon-test"
  treasury: "treasury"
  rate_tolerance_secs: 600
tiers:
  - price: "1"
    capacity: "500"
rates:
  USD: 1
  POLY: "1/2"
"#;

struct Daemon {
    st: Arc<state::AppState>,
    clock: Arc<ManualClock>,
}

impl Daemon {
    fn boot() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
        ));
        let loaded = sto_config::load_layered_yaml_from_strings(&[CONFIG]).unwrap();
        let st = state::AppState::boot(&loaded, Some(AdminToken::new(TOKEN)), clock.clone())
            .unwrap();
        Self {
            st: Arc::new(st),
            clock,
        }
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("GET")
            .uri(uri)
            .body(axum::body::Body::empty())
            .unwrap();
        call(routes::build_router(Arc::clone(&self.st)), req).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();
        call(routes::build_router(Arc::clone(&self.st)), req).await
    }

    async fn admin(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {TOKEN}"))
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();
        call(routes::build_router(Arc::clone(&self.st)), req).await
    }

    async fn whitelist(&self, investor: &str, class: &str) {
        let (status, _) = self
            .admin(
                "/v1/admin/whitelist",
                json!({"investor": investor, "class": class}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, Value) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body: bytes::Bytes = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("body is not valid JSON")
    };
    (status, json)
}

fn buy(buyer: &str, currency: &str, amount: &str) -> Value {
    json!({"buyer": buyer, "currency": currency, "amount": amount})
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_and_status_report_an_open_sale() {
    let d = Daemon::boot();

    let (status, json) = d.get("/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "sto-daemon");

    let (status, json) = d.get("/v1/sale/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stats"]["state"], "open");
    assert_eq!(json["stats"]["tokens_remaining"], "500");
    assert_eq!(json["stats"]["version"], 1);
    assert!(!json["config_hash"].as_str().unwrap().is_empty());

    let (status, json) = d.get("/v1/sale/tiers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Purchases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn purchase_commits_and_investor_is_visible() {
    let d = Daemon::boot();
    d.whitelist("bob", "non_accredited").await;

    let (status, preview) = d.post("/v1/sale/preview", buy("bob", "USD", "150")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["result"]["tokens_allocated"], "100");

    let (status, json) = d.post("/v1/sale/purchase", buy("bob", "USD", "150")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["plan"]["result"]["tokens_allocated"], "100");
    assert_eq!(json["plan"]["result"]["currency_amount_refunded"], "50");
    assert_eq!(json["settlement"]["status"], "complete");

    let (status, json) = d.get("/v1/sale/investors/bob").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["invested_units"], "100");

    let (status, json) = d.post("/v1/sale/purchase", buy("bob", "USD", "1")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "CAP_EXCEEDED");
    assert_eq!(json["retryable"], false);

    let (status, _) = d.get("/v1/sale/investors/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unlisted_investor_is_forbidden() {
    let d = Daemon::boot();
    let (status, json) = d.post("/v1/sale/purchase", buy("eve", "USD", "10")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "NOT_WHITELISTED");
}

#[tokio::test]
async fn duplicate_purchase_id_conflicts() {
    let d = Daemon::boot();
    d.whitelist("alice", "accredited").await;

    let mut body = buy("alice", "USD", "10");
    body["purchase_id"] = json!("5b0f7c62-2e4d-4a1b-9c3e-7d8f6a5b4c3d");

    let (status, _) = d.post("/v1/sale/purchase", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = d.post("/v1/sale/purchase", body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "DUPLICATE_PURCHASE");

    let (status, json) = d
        .post(
            "/v1/sale/purchases/5b0f7c62-2e4d-4a1b-9c3e-7d8f6a5b4c3d/retry",
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "complete");

    let (status, json) = d
        .post(
            "/v1/sale/purchases/00000000-0000-4000-8000-000000000000/retry",
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "UNKNOWN_PURCHASE");
}

#[tokio::test]
async fn stale_rate_is_retryable_until_a_fresh_quote_arrives() {
    let d = Daemon::boot();
    d.whitelist("alice", "accredited").await;
    d.clock.advance(Duration::seconds(601));

    let (status, json) = d.post("/v1/sale/purchase", buy("alice", "USD", "10")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "RATE_UNAVAILABLE");
    assert_eq!(json["retryable"], true);

    let (status, _) = d
        .admin(
            "/v1/admin/rates",
            json!({"currency": "USD", "numerator": "1", "denominator": "1"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = d.post("/v1/sale/purchase", buy("alice", "USD", "10")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn sale_events_reach_the_bus() {
    let d = Daemon::boot();
    d.whitelist("carol", "accredited").await;
    let mut rx = d.st.bus.subscribe();

    let (status, _) = d.post("/v1/sale/purchase", buy("carol", "POLY", "40")).await;
    assert_eq!(status, StatusCode::OK);

    let mut kinds = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let state::BusMsg::Sale { event } = msg {
            kinds.push(event.kind());
            if let SaleEvent::TokenPurchase { tokens, .. } = event {
                assert_eq!(tokens.raw(), 20);
            }
        }
    }
    assert_eq!(kinds, vec!["TOKEN_PURCHASE", "FUNDS_RECEIVED"]);
}

#[tokio::test]
async fn exhausted_sale_answers_sold_out() {
    let d = Daemon::boot();
    d.whitelist("alice", "accredited").await;
    d.whitelist("carol", "accredited").await;

    let (status, json) = d.post("/v1/sale/purchase", buy("alice", "USD", "600")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["plan"]["result"]["tokens_allocated"], "500");
    assert_eq!(json["plan"]["result"]["currency_amount_refunded"], "100");

    let (status, json) = d.post("/v1/sale/purchase", buy("carol", "USD", "10")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "SOLD_OUT");
    assert_eq!(json["retryable"], false);

    let (status, json) = d.post("/v1/sale/preview", buy("carol", "USD", "10")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "SOLD_OUT");

    let (_, json) = d.get("/v1/sale/status").await;
    assert_eq!(json["stats"]["state"], "closed");
    assert_eq!(json["stats"]["tokens_remaining"], "0");
}
