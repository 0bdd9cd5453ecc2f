// src/api.rs
// Axum router: auth, transaction CRUD and ledger verification
use crate::anchor_service::{AnchorError, AnchorService, VerifyOutcome};
use crate::auth::{hash_password, verify_password, AuthError, Claims, JwtKeys};
use crate::digest::verify_content_digest;
use crate::model::{
    normalize_email, AccountStatus, PaymentMethod, Transaction, TransactionMetadata, TransactionType, User,
};
use crate::storage::{StorageMode, StoreError, TransactionStore, UserStore};

use axum::async_trait;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, Extension, FromRequestParts, Path, Query};
use axum::headers::authorization::Bearer;
use axum::headers::Authorization;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Router, TypedHeader};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 500;

/// Shared handles every handler reaches through `Extension<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub transactions: Arc<dyn TransactionStore>,
    pub users: Arc<dyn UserStore>,
    pub anchor: Arc<AnchorService>,
    pub jwt: Arc<JwtKeys>,
    pub storage_mode: StorageMode,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
        }
    }
}

/// Fixed-window budget of API calls per client IP; `local` when the peer is unknown.
#[derive(Clone)]
struct RateLimiter {
    // client ip -> (calls this window, window opened at)
    buckets: Arc<Mutex<HashMap<String, (u32, Instant)>>>,
    max_requests: u32,
    window_duration: Duration,
}

impl RateLimiter {
    fn new(settings: RateLimitSettings) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            max_requests: settings.max_requests,
            window_duration: Duration::from_secs(settings.window_secs),
        }
    }

    /// Spend one call from `ip`'s budget; false once the window is used up.
    fn admit(&self, ip: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();

        // forget clients idle for two windows once the map gets large
        if buckets.len() > 10_000 {
            let window = self.window_duration;
            buckets.retain(|_, (_, start)| now.duration_since(*start) < window * 2);
        }

        let (count, window_start) = buckets.entry(ip.to_string()).or_insert((0, now));
        if now.duration_since(*window_start) > self.window_duration {
            *count = 1;
            *window_start = now;
            true
        } else if *count < self.max_requests {
            *count += 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateKey(key) => ApiError::Conflict(format!("{} already exists", key)),
            StoreError::NotFound(key) => ApiError::NotFound(format!("{} not found", key)),
            StoreError::PreconditionFailed(_) | StoreError::Immutable(_) => ApiError::Conflict(e.to_string()),
            StoreError::Invalid(msg) => ApiError::BadRequest(msg),
            StoreError::Backend(_) | StoreError::Serialization(_) => {
                error!("Store error: {:?}", e);
                ApiError::Internal("database error".into())
            }
        }
    }
}

impl From<AnchorError> for ApiError {
    fn from(e: AnchorError) -> Self {
        match e {
            AnchorError::Validation(msg) => ApiError::BadRequest(msg),
            AnchorError::NotFound(id) => ApiError::NotFound(format!("Transaction {} not found", id)),
            AnchorError::InProgress(_) => ApiError::Conflict(e.to_string()),
            AnchorError::Connection(msg) => ApiError::Internal(msg),
            AnchorError::Ledger(inner) => ApiError::Internal(inner.to_string()),
            AnchorError::Store(inner) => inner.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            other => {
                error!("Auth error: {}", other);
                ApiError::Internal("authentication error".into())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "success": false, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

fn validation_message(errors: &validator::ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(m) => m.to_string(),
                None => format!("{} is invalid", field),
            })
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

/// Caller identity from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(app) = Extension::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Internal("application state missing".into()))?;
        let TypedHeader(Authorization(bearer)) = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Unauthorized("Access denied. No token provided.".into()))?;
        let claims = app.jwt.verify(bearer.token())?;
        Ok(AuthUser(claims))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))?
        .map_err(ApiError::from)
}

///////////////////////////////////////////////////////////////////////////
// GET / and GET /health
///////////////////////////////////////////////////////////////////////////
async fn root() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "message": "SecureFin API is running",
        "time": chrono::Utc::now(),
    }))
}

async fn health(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ledger = state.anchor.ledger();
    Json(json!({
        "status": "ok",
        "ledgerConnected": ledger.is_connected(),
        "ledger": ledger.describe(),
        "storage": state.storage_mode.as_str(),
    }))
}

///////////////////////////////////////////////////////////////////////////
// /api/auth
///////////////////////////////////////////////////////////////////////////
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

async fn register(
    Extension(state): Extension<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut req) = payload?;
    req.email = normalize_email(&req.email);
    req.first_name = req.first_name.trim().to_string();
    req.last_name = req.last_name.trim().to_string();
    req.validate().map_err(|e| ApiError::BadRequest(validation_message(&e)))?;

    if state.users.find_by_email(&req.email).await?.is_some() {
        return Err(ApiError::Conflict("User already exists with this email".into()));
    }

    let password = req.password;
    let password_hash = blocking(move || hash_password(&password)).await?;
    let user = User::new(
        Uuid::new_v4().to_string(),
        &req.email,
        password_hash,
        req.first_name,
        req.last_name,
    );
    let user = state.users.create(user).await.map_err(|e| match e {
        StoreError::DuplicateKey(_) => ApiError::Conflict("User already exists with this email".into()),
        other => other.into(),
    })?;
    let token = state.jwt.issue(&user)?;

    info!("👤 Registered user {}", user.user_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user.profile(), "token": token })),
    ))
}

async fn login(
    Extension(state): Extension<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("Email and password are required".into()));
    }

    let invalid = || ApiError::Unauthorized("Invalid credentials".into());
    let user = state
        .users
        .find_by_email(&normalize_email(&req.email))
        .await?
        .ok_or_else(invalid)?;

    let password = req.password;
    let stored_hash = user.password_hash.clone();
    if !blocking(move || verify_password(&password, &stored_hash)).await? {
        warn!("Failed login for {}", user.user_id);
        return Err(invalid());
    }
    if user.account_status != AccountStatus::Active {
        return Err(ApiError::Forbidden("Account is not active".into()));
    }

    let token = state.jwt.issue(&user)?;
    Ok(Json(json!({ "success": true, "user": user.profile(), "token": token })))
}

async fn me(Extension(state): Extension<AppState>, AuthUser(claims): AuthUser) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .users
        .find_by_id(&claims.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(json!({ "success": true, "user": user.profile() })))
}

///////////////////////////////////////////////////////////////////////////
// /api/transactions
///////////////////////////////////////////////////////////////////////////
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    #[validate(range(min = 0.0, message = "Amount must be a non-negative number"))]
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[validate(length(min = 1, message = "Category is required"))]
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub currency: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub source_account: Option<String>,
    pub destination_account: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub notes: Option<String>,
}

/// `TXN_<unix millis>_<6 hex chars>`
pub fn generate_transaction_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("TXN_{}_{}", chrono::Utc::now().timestamp_millis(), &suffix[..6])
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn create_transaction(
    Extension(state): Extension<AppState>,
    AuthUser(claims): AuthUser,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut req) = payload?;
    req.category = req.category.trim().to_string();
    req.validate().map_err(|e| ApiError::BadRequest(validation_message(&e)))?;
    if !req.amount.is_finite() {
        return Err(ApiError::BadRequest("Amount must be a non-negative number".into()));
    }

    let mut tx = Transaction::new(generate_transaction_id(), claims.user_id, req.kind, req.amount);
    tx.category = req.category;
    tx.description = req.description;
    if let Some(currency) = req.currency.filter(|c| !c.trim().is_empty()) {
        tx.currency = currency.trim().to_uppercase();
    }
    tx.payment_method = req.payment_method;
    tx.source_account = req.source_account;
    tx.destination_account = req.destination_account;
    tx.tags = req.tags;
    tx.attachments = req.attachments;
    tx.notes = req.notes;
    tx.metadata = TransactionMetadata {
        location: header_value(&headers, "x-location"),
        device_id: header_value(&headers, "x-device-id"),
        ip_address: peer.map(|ConnectInfo(addr)| addr.ip().to_string()),
    };

    let tx = state.transactions.create(tx).await?;
    info!("📝 Created transaction {} for {}", tx.transaction_id, tx.user_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Transaction created successfully",
            "data": tx,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

async fn list_transactions(
    Extension(state): Extension<AppState>,
    AuthUser(claims): AuthUser,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let data = state.transactions.list_by_user(&claims.user_id, limit).await?;
    Ok(Json(json!({ "success": true, "count": data.len(), "data": data })))
}

async fn owned_transaction(state: &AppState, claims: &Claims, id: &str) -> Result<Transaction, ApiError> {
    let tx = state
        .transactions
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Transaction not found".into()))?;
    if tx.user_id != claims.user_id {
        return Err(ApiError::Forbidden("Access denied".into()));
    }
    Ok(tx)
}

async fn get_transaction(
    Extension(state): Extension<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tx = owned_transaction(&state, &claims, &id).await?;
    Ok(Json(json!({ "success": true, "data": tx })))
}

async fn transaction_integrity(
    Extension(state): Extension<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tx = owned_transaction(&state, &claims, &id).await?;
    let scheme = match (&tx.digest_nonce, tx.blockchain_hash.is_empty()) {
        (_, true) => "none",
        (Some(_), false) => "content",
        (None, false) => "timestamped",
    };
    Ok(Json(json!({
        "success": true,
        "transactionId": tx.transaction_id,
        "anchored": tx.is_anchored(),
        "scheme": scheme,
        "matches": verify_content_digest(&tx),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default)]
    pub transaction_id: String,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    success: bool,
    #[serde(flatten)]
    outcome: VerifyOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

///////////////////////////////////////////////////////////////////////////
// POST /api/transactions/verify
///////////////////////////////////////////////////////////////////////////
async fn verify_transaction(
    Extension(state): Extension<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let outcome = state.anchor.verify(&req.transaction_id).await.map_err(|e| {
        warn!("Verification of {:?} failed: {}", req.transaction_id, e);
        ApiError::from(e)
    })?;
    let message = outcome.already_verified.then_some("Transaction already verified");
    Ok(Json(VerifyResponse {
        success: true,
        outcome,
        message,
    }))
}

/// Logs method, path, status and latency for every request.
async fn logging_middleware<B>(req: Request<B>, next: Next<B>) -> Result<Response, StatusCode> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    info!("{} {} {} - {:.3}s", method, path, response.status().as_u16(), latency);

    Ok(response)
}

/// Returns 429 once a client IP exceeds its window budget.
/// Requests without connection info (in-process callers) share one bucket.
async fn rate_limit_middleware<B>(
    peer: Option<ConnectInfo<SocketAddr>>,
    Extension(rate_limiter): Extension<RateLimiter>,
    req: Request<B>,
    next: Next<B>,
) -> Response {
    let ip = peer
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "local".to_string());

    if rate_limiter.admit(&ip) {
        next.run(req).await
    } else {
        warn!("🚫 Rate limit exceeded for IP: {}", ip);
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "success": false, "message": "Too many requests, please try again later" })),
        )
            .into_response()
    }
}

pub fn router(state: AppState, limits: RateLimitSettings) -> Router {
    let rate_limiter = RateLimiter::new(limits);
    info!(
        "🛡️  Rate limiting enabled: {} requests per {} seconds",
        limits.max_requests, limits.window_secs
    );

    let public_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health));

    let api_routes = Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/transactions", post(create_transaction).get(list_transactions))
        .route("/api/transactions/verify", post(verify_transaction))
        .route("/api/transactions/:id", get(get_transaction))
        .route("/api/transactions/:id/integrity", get(transaction_integrity))
        .layer(middleware::from_fn(rate_limit_middleware))
        .layer(Extension(rate_limiter));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(middleware::from_fn(logging_middleware))
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}
