use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::classifier::classify_status;
use super::{
    Authority, AuthorityError, BatchReceipt, BatchStatusReport, EventReceipt, FailureKind,
};
use crate::company::CredentialStore;
use crate::models::Environment;

const USER_AGENT: &str = concat!("dte-contingency/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct HaciendaConfig {
    pub base_url: String,
    pub auth_url: String,
    pub timeout: Duration,
    pub retry_max: u32,
    pub retry_wait_min: Duration,
    pub retry_wait_max: Duration,
    pub token_ttl: Duration,
}

impl HaciendaConfig {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            auth_url: format!("{base_url}/seguridad/auth"),
            base_url,
            timeout: Duration::from_secs(60),
            retry_max: 3,
            retry_wait_min: Duration::from_secs(2),
            retry_wait_max: Duration::from_secs(10),
            token_ttl: Duration::from_secs(12 * 60 * 60),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_wait_min
            .saturating_mul(factor)
            .min(self.retry_wait_max)
    }
}

struct CachedToken {
    token: String,
    fetched_at: Instant,
}

/// Reqwest-backed client for the Hacienda reception API.
pub struct HaciendaClient {
    client: reqwest::Client,
    config: HaciendaConfig,
    credentials: Arc<dyn CredentialStore>,
    tokens: DashMap<Uuid, CachedToken>,
}

#[derive(Deserialize)]
struct AuthResponse {
    status: String,
    body: Option<AuthBody>,
}

#[derive(Deserialize)]
struct AuthBody {
    token: String,
}

#[derive(Serialize)]
struct EventRequest<'a> {
    nit: &'a str,
    documento: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest<'a> {
    ambiente: &'a str,
    id_envio: String,
    version: i32,
    nit_emisor: &'a str,
    documentos: &'a [String],
}

impl HaciendaClient {
    pub fn new(
        config: HaciendaConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, AuthorityError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AuthorityError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            credentials,
            tokens: DashMap::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Send, retrying connection failures, 5xx and 429 with capped exponential backoff.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, AuthorityError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let transient =
                        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    if !transient || attempt >= self.config.retry_max {
                        return Ok(resp);
                    }
                    attempt += 1;
                    tracing::warn!(%status, attempt, "authority returned transient status, retrying");
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.config.retry_max => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "authority unreachable, retrying");
                }
                Err(e) => {
                    let code = if e.is_timeout() { "TIMEOUT" } else { "CONNECTION_ERROR" };
                    return Err(AuthorityError::new(
                        FailureKind::Network,
                        code,
                        format!("failed to reach authority: {e}"),
                    ));
                }
            }
            tokio::time::sleep(self.config.backoff(attempt)).await;
        }
    }

    /// Send with `token`. A 401 drops the cached token; when it belonged to a
    /// known company the request is repeated once with a fresh login.
    async fn send_authorized<F>(
        &self,
        token: &str,
        build: F,
    ) -> Result<reqwest::Response, AuthorityError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let resp = self.send_with_retry(|| build(token)).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let Some(company_id) = self.evict_token(token) else {
            return Err(token_rejected());
        };
        tracing::warn!(%company_id, "authority rejected cached token, logging in again");
        let fresh = self.authenticate(company_id).await?;
        let resp = self.send_with_retry(|| build(&fresh)).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            self.evict_token(&fresh);
            return Err(token_rejected());
        }
        Ok(resp)
    }

    /// Remove whichever company's cached entry holds `token`.
    fn evict_token(&self, token: &str) -> Option<Uuid> {
        let company_id = self
            .tokens
            .iter()
            .find(|entry| entry.token == token)
            .map(|entry| *entry.key())?;
        self.tokens.remove(&company_id);
        Some(company_id)
    }
}

fn token_rejected() -> AuthorityError {
    AuthorityError::new(
        FailureKind::Server,
        "TOKEN_EXPIRED",
        "authority rejected the session token",
    )
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, AuthorityError> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| {
        AuthorityError::new(FailureKind::Network, "RESPONSE_READ_ERROR", e.to_string())
    })?;

    if !status.is_success() {
        return Err(AuthorityError::new(
            classify_status(status.as_u16()),
            format!("HTTP_{}", status.as_u16()),
            truncate(&body),
        ));
    }

    serde_json::from_str(&body).map_err(|e| {
        AuthorityError::new(
            FailureKind::Validation,
            "RESPONSE_PARSE_ERROR",
            format!("{e}: {}", truncate(&body)),
        )
    })
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[async_trait]
impl Authority for HaciendaClient {
    async fn authenticate(&self, company_id: Uuid) -> Result<String, AuthorityError> {
        if let Some(cached) = self.tokens.get(&company_id) {
            if cached.fetched_at.elapsed() < self.config.token_ttl {
                return Ok(cached.token.clone());
            }
        }

        let creds = self
            .credentials
            .load_credentials(company_id)
            .await
            .map_err(|e| AuthorityError::new(e.failure_kind(), "CREDENTIALS", e.to_string()))?;

        let form = [
            ("user", creds.nit.as_str()),
            ("pwd", creds.authority_password.as_str()),
        ];
        let resp = self
            .send_with_retry(|| self.client.post(&self.config.auth_url).form(&form))
            .await?;
        let auth: AuthResponse = read_json(resp).await?;

        let token = match (auth.status.as_str(), auth.body) {
            ("OK", Some(body)) if !body.token.is_empty() => body.token,
            (status, _) => {
                return Err(AuthorityError::new(
                    FailureKind::Validation,
                    "AUTH_FAILED",
                    format!("authentication refused (status {status})"),
                ));
            }
        };

        self.tokens.insert(
            company_id,
            CachedToken {
                token: token.clone(),
                fetched_at: Instant::now(),
            },
        );
        tracing::debug!(%company_id, "authority token refreshed");
        Ok(token)
    }

    fn invalidate_token(&self, company_id: Uuid) -> bool {
        self.tokens.remove(&company_id).is_some()
    }

    async fn submit_contingency_event(
        &self,
        token: &str,
        nit: &str,
        signed_event: &str,
    ) -> Result<EventReceipt, AuthorityError> {
        let url = self.url("/fesv/contingencia");
        let body = EventRequest {
            nit,
            documento: signed_event,
        };
        let resp = self
            .send_authorized(token, |t: &str| {
                self.client
                    .post(&url)
                    .header(reqwest::header::AUTHORIZATION, t)
                    .json(&body)
            })
            .await?;
        read_json(resp).await
    }

    async fn submit_batch(
        &self,
        token: &str,
        ambiente: Environment,
        nit: &str,
        documents: &[String],
    ) -> Result<BatchReceipt, AuthorityError> {
        let url = self.url("/fesv/recepcionlote");
        let body = BatchRequest {
            ambiente: ambiente.code(),
            id_envio: Uuid::new_v4().to_string().to_uppercase(),
            version: 1,
            nit_emisor: nit,
            documentos: documents,
        };
        let resp = self
            .send_authorized(token, |t: &str| {
                self.client
                    .post(&url)
                    .header(reqwest::header::AUTHORIZATION, t)
                    .json(&body)
            })
            .await?;
        read_json(resp).await
    }

    async fn query_batch_status(
        &self,
        token: &str,
        codigo_lote: &str,
    ) -> Result<BatchStatusReport, AuthorityError> {
        let url = self.url(&format!("/fesv/recepcion/consultadtelote/{codigo_lote}"));
        let resp = self
            .send_authorized(token, |t: &str| {
                self.client
                    .get(&url)
                    .header(reqwest::header::AUTHORIZATION, t)
            })
            .await?;
        read_json(resp).await
    }
}
