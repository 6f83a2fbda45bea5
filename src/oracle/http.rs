// src/oracle/http.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::oracle::{Oracle, RawProductRecord};
use crate::utils::error::OracleError;

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    text: &'a str,
}

/// Payload shapes the service is known to answer with.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ParseResponse {
    Bare(Vec<RawProductRecord>),
    Wrapped { products: Option<Vec<RawProductRecord>> },
}

/// JSON-over-HTTP oracle: `POST {endpoint}` with `{"text": ..}`.
pub struct HttpOracle {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOracle {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn parse(&self, text: &str) -> Result<Option<Vec<RawProductRecord>>, OracleError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(OracleError::MissingEndpoint);
        }

        let mut request = self.http.post(endpoint).json(&ParseRequest { text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| OracleError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(OracleError::Http(format!("HTTP {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|err| OracleError::Http(err.to_string()))?;

        decode_response(&body)
    }
}

pub(crate) fn decode_response(body: &str) -> Result<Option<Vec<RawProductRecord>>, OracleError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }

    let payload: ParseResponse =
        serde_json::from_str(trimmed).map_err(|err| OracleError::InvalidResponse(err.to_string()))?;

    Ok(match payload {
        ParseResponse::Wrapped { products } => products,
        ParseResponse::Bare(records) => Some(records),
    })
}
