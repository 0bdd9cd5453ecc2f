// tests/api_routes.rs
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use securefin_node::anchor_service::{AnchorOptions, AnchorService, MissingPolicy};
use securefin_node::api::{router, AppState, RateLimitSettings};
use securefin_node::auth::JwtKeys;
use securefin_node::ledger::SimulatedLedger;
use securefin_node::storage::{MemoryStore, StorageMode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    ledger: Arc<SimulatedLedger>,
}

fn test_app(missing: MissingPolicy) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(SimulatedLedger::new());
    let options = AnchorOptions {
        missing,
        ..AnchorOptions::default()
    };
    let anchor = AnchorService::new(store.clone(), ledger.clone(), options);
    let state = AppState {
        transactions: store.clone(),
        users: store,
        anchor: Arc::new(anchor),
        jwt: Arc::new(JwtKeys::new("integration-secret-integration-secret", 3600)),
        storage_mode: StorageMode::Memory,
    };
    TestApp {
        app: router(state, RateLimitSettings { max_requests: 1_000, window_secs: 60 }),
        ledger,
    }
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {}", t));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(app: &Router, email: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": email, "password": "hunter22", "firstName": "Ada", "lastName": "Lovelace" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn register_login_and_me() {
    let t = test_app(MissingPolicy::CreatePlaceholder);
    let token = register(&t.app, "Ada@Example.com").await;

    let (status, body) = call(&t.app, "GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert_eq!(body["user"]["name"], "Ada Lovelace");
    assert!(body["user"].get("passwordHash").is_none());

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "ada@example.com", "password": "hunter22" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().is_some());
}

#[tokio::test]
async fn auth_failures() {
    let t = test_app(MissingPolicy::CreatePlaceholder);
    register(&t.app, "grace@example.com").await;

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": "grace@example.com", "password": "hunter22", "firstName": "G", "lastName": "H" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "grace@example.com", "password": "wrong-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");

    let (status, _) = call(&t.app, "GET", "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&t.app, "GET", "/api/transactions", Some("not-a-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_validation_lists_problems() {
    let t = test_app(MissingPolicy::CreatePlaceholder);
    let (status, body) = call(
        &t.app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": "nope", "password": "123", "firstName": " ", "lastName": "X" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("valid email"));
    assert!(message.contains("at least 6"));
    assert!(message.contains("First name"));
}

#[tokio::test]
async fn transactions_are_listed_newest_first_and_owner_only() {
    let t = test_app(MissingPolicy::CreatePlaceholder);
    let alice = register(&t.app, "alice@example.com").await;
    let bob = register(&t.app, "bob@example.com").await;

    let mut ids = Vec::new();
    for (amount, category) in [(10.0, "Food"), (20.0, "Rent"), (30.0, "Travel")] {
        let (status, body) = call(
            &t.app,
            "POST",
            "/api/transactions",
            Some(&alice),
            Some(json!({ "amount": amount, "type": "expense", "category": category })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["currency"], "INR");
        assert_eq!(body["data"]["blockchainHash"], "");
        ids.push(body["data"]["transactionId"].as_str().unwrap().to_string());
    }

    let (status, body) = call(&t.app, "GET", "/api/transactions?limit=2", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["data"][0]["transactionId"], ids[2].as_str());
    assert_eq!(body["data"][1]["transactionId"], ids[1].as_str());

    let (status, body) = call(&t.app, "GET", "/api/transactions", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    let uri = format!("/api/transactions/{}", ids[0]);
    let (status, _) = call(&t.app, "GET", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = call(&t.app, "GET", &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["category"], "Food");

    let (status, _) = call(&t.app, "GET", "/api/transactions/TXN_NOPE", Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_keeps_optional_fields() {
    let t = test_app(MissingPolicy::CreatePlaceholder);
    let token = register(&t.app, "files@example.com").await;
    let (status, body) = call(
        &t.app,
        "POST",
        "/api/transactions",
        Some(&token),
        Some(json!({
            "amount": 250.0,
            "type": "expense",
            "category": "Office",
            "currency": "usd",
            "tags": ["q4"],
            "attachments": ["receipts/2024-10-01.pdf", "receipts/2024-10-02.pdf"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["currency"], "USD");
    assert_eq!(body["data"]["tags"], json!(["q4"]));
    assert_eq!(body["data"]["attachments"], json!(["receipts/2024-10-01.pdf", "receipts/2024-10-02.pdf"]));

    let uri = format!("/api/transactions/{}", body["data"]["transactionId"].as_str().unwrap());
    let (status, body) = call(&t.app, "GET", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["attachments"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn create_rejects_negative_amount() {
    let t = test_app(MissingPolicy::CreatePlaceholder);
    let token = register(&t.app, "neg@example.com").await;
    let (status, body) = call(
        &t.app,
        "POST",
        "/api/transactions",
        Some(&token),
        Some(json!({ "amount": -5, "type": "income", "category": "Salary" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn verify_is_idempotent_over_http() {
    let t = test_app(MissingPolicy::CreatePlaceholder);

    let (status, first) = call(
        &t.app,
        "POST",
        "/api/transactions/verify",
        None,
        Some(json!({ "transactionId": "TXN_1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", first);
    assert_eq!(first["success"], true);
    assert!(first["txHash"].as_str().unwrap().starts_with("0x"));
    assert!(first.get("message").is_none());

    let (status, second) = call(
        &t.app,
        "POST",
        "/api/transactions/verify",
        None,
        Some(json!({ "transactionId": "TXN_1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["txHash"], first["txHash"]);
    assert_eq!(second["blockNumber"], first["blockNumber"]);
    assert_eq!(second["blockchainHash"], first["blockchainHash"]);
    assert_eq!(second["message"], "Transaction already verified");
    assert_eq!(t.ledger.submission_count(), 1);
}

#[tokio::test]
async fn integrity_reports_recomputed_digest() {
    let t = test_app(MissingPolicy::Reject);
    let token = register(&t.app, "audit@example.com").await;
    let (_, created) = call(
        &t.app,
        "POST",
        "/api/transactions",
        Some(&token),
        Some(json!({ "amount": 99.5, "type": "income", "category": "Salary" })),
    )
    .await;
    let id = created["data"]["transactionId"].as_str().unwrap().to_string();
    let uri = format!("/api/transactions/{}/integrity", id);

    let (status, body) = call(&t.app, "GET", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["anchored"], false);
    assert_eq!(body["scheme"], "none");
    assert!(body["matches"].is_null());

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/transactions/verify",
        None,
        Some(json!({ "transactionId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&t.app, "GET", &uri, Some(&token), None).await;
    assert_eq!(body["anchored"], true);
    assert_eq!(body["scheme"], "content");
    assert_eq!(body["matches"], true);

    let (_, tx) = call(&t.app, "GET", &format!("/api/transactions/{}", id), Some(&token), None).await;
    assert_eq!(tx["data"]["status"], "confirmed");
    assert_eq!(tx["data"]["blockchainConfirmed"], true);
}

#[tokio::test]
async fn verify_errors_carry_messages() {
    let t = test_app(MissingPolicy::CreatePlaceholder);

    let (status, body) = call(&t.app, "POST", "/api/transactions/verify", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Transaction ID is required");

    t.ledger.fail_with("simulated network error");
    let (status, body) = call(
        &t.app,
        "POST",
        "/api/transactions/verify",
        None,
        Some(json!({ "transactionId": "TXN_2" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("simulated network error"));
}

#[tokio::test]
async fn verify_rejects_unknown_ids_when_configured() {
    let t = test_app(MissingPolicy::Reject);
    let (status, body) = call(
        &t.app,
        "POST",
        "/api/transactions/verify",
        None,
        Some(json!({ "transactionId": "TXN_404" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(t.ledger.submission_count(), 0);
}

#[tokio::test]
async fn root_banner() {
    let t = test_app(MissingPolicy::CreatePlaceholder);
    let (status, body) = call(&t.app, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["time"].as_str().is_some());
}
