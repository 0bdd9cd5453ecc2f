use crate::error::{Result, SdkError};
use crate::types::*;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

/// Client for a SecureFin node's HTTP API
#[derive(Clone)]
pub struct SecureFinClient {
    base_url: String,
    client: Client,
    token: Option<String>,
}

impl SecureFinClient {
    /// Create a new client
    pub fn new(node_url: impl Into<String>) -> Self {
        Self::with_client(node_url, Client::new())
    }

    /// Create a client with custom reqwest client
    pub fn with_client(node_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: node_url.into().trim_end_matches('/').to_string(),
            client,
            token: None,
        }
    }

    /// Use an existing bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.token.as_deref().ok_or(SdkError::NotAuthenticated)?;
        Ok(request.bearer_auth(token))
    }

    /// Register a new account; the returned token is kept for later calls.
    pub async fn register(&mut self, email: &str, password: &str, first_name: &str, last_name: &str) -> Result<AuthSession> {
        let request = self.client.post(self.url("/api/auth/register")).json(&json!({
            "email": email,
            "password": password,
            "firstName": first_name,
            "lastName": last_name,
        }));
        let session: AuthSession = parse(request.send().await?).await?;
        self.token = Some(session.token.clone());
        Ok(session)
    }

    /// Log in; the returned token is kept for later calls.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<AuthSession> {
        let request = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": password }));
        let session: AuthSession = parse(request.send().await?).await?;
        self.token = Some(session.token.clone());
        Ok(session)
    }

    pub async fn me(&self) -> Result<UserProfile> {
        let request = self.authed(self.client.get(self.url("/api/auth/me")))?;
        let response: UserResponse = parse(request.send().await?).await?;
        Ok(response.user)
    }

    pub async fn create_transaction(&self, tx: &NewTransaction) -> Result<Transaction> {
        let request = self.authed(self.client.post(self.url("/api/transactions")))?.json(tx);
        let response: DataResponse<Transaction> = parse(request.send().await?).await?;
        Ok(response.data)
    }

    /// The caller's transactions, newest first
    pub async fn list_transactions(&self, limit: Option<usize>) -> Result<Vec<Transaction>> {
        let mut request = self.authed(self.client.get(self.url("/api/transactions")))?;
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let response: DataResponse<Vec<Transaction>> = parse(request.send().await?).await?;
        Ok(response.data)
    }

    pub async fn get_transaction(&self, transaction_id: &str) -> Result<Transaction> {
        let path = format!("/api/transactions/{}", transaction_id);
        let request = self.authed(self.client.get(self.url(&path)))?;
        let response: DataResponse<Transaction> = parse(request.send().await?).await?;
        Ok(response.data)
    }

    pub async fn transaction_integrity(&self, transaction_id: &str) -> Result<IntegrityReport> {
        let path = format!("/api/transactions/{}/integrity", transaction_id);
        let request = self.authed(self.client.get(self.url(&path)))?;
        parse(request.send().await?).await
    }

    /// Anchor a transaction on the ledger, or fetch its existing receipt
    pub async fn verify_transaction(&self, transaction_id: &str) -> Result<VerifyReceipt> {
        let request = self
            .client
            .post(self.url("/api/transactions/verify"))
            .json(&json!({ "transactionId": transaction_id }));
        parse(request.send().await?).await
    }

    pub async fn health(&self) -> Result<Health> {
        parse(self.client.get(self.url("/health")).send().await?).await
    }

    /// Check node health
    pub async fn health_check(&self) -> Result<bool> {
        let response = self.client.get(self.url("/health")).send().await?;
        Ok(response.status().is_success())
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.message)
        .unwrap_or_else(|_| if text.is_empty() { status.to_string() } else { text });
    Err(SdkError::Api {
        status: status.as_u16(),
        message,
    })
}

// Internal response types
#[derive(Deserialize)]
struct UserResponse {
    user: UserProfile,
}

#[derive(Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: String,
}
