use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Signer, SignerError};

/// Client for the local firmador service.
#[derive(Debug, Clone)]
pub struct FirmadorClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    nit: &'a str,
    activo: bool,
    password_pri: &'a str,
    dte_json: &'a Value,
}

#[derive(Deserialize)]
struct SignResponse {
    status: String,
    #[serde(default)]
    body: Value,
}

impl FirmadorClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SignerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SignerError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/firmardocumento/", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Signer for FirmadorClient {
    async fn sign(&self, nit: &str, password: &str, payload: &Value) -> Result<String, SignerError> {
        let request = SignRequest {
            nit,
            activo: true,
            password_pri: password,
            dte_json: payload,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| SignerError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(SignerError::Unavailable(format!("firmador returned HTTP {status}")));
        }

        let body: SignResponse = resp
            .json()
            .await
            .map_err(|e| SignerError::Unavailable(format!("unreadable firmador response: {e}")))?;

        match (body.status.as_str(), body.body) {
            ("OK", Value::String(signed)) if !signed.is_empty() => Ok(signed),
            (_, detail) => Err(SignerError::Rejected {
                code: detail["codigo"].as_str().unwrap_or("UNKNOWN").to_string(),
                message: detail["mensaje"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| detail.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn returns_signed_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/firmardocumento/"))
            .and(body_partial_json(json!({
                "nit": "06142803901121",
                "activo": true,
                "passwordPri": "pw",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "status": "OK", "body": "eyJ.a.b" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = FirmadorClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let signed = client
            .sign("06142803901121", "pw", &json!({ "identificacion": {} }))
            .await
            .unwrap();
        assert_eq!(signed, "eyJ.a.b");
    }

    #[tokio::test]
    async fn error_body_is_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ERROR",
                "body": { "codigo": "COD_803", "mensaje": "password incorrecto" }
            })))
            .mount(&server)
            .await;

        let client = FirmadorClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.sign("1", "bad", &json!({})).await.unwrap_err();
        match err {
            SignerError::Rejected { code, message } => {
                assert_eq!(code, "COD_803");
                assert_eq!(message, "password incorrecto");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_means_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = FirmadorClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.sign("1", "pw", &json!({})).await.unwrap_err();
        assert!(matches!(err, SignerError::Unavailable(_)));
    }
}
