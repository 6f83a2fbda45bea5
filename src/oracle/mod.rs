// src/oracle/mod.rs
pub mod chunking;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::utils::error::OracleError;

pub use chunking::{split_for_oracle, ITEM_MARKER};
pub use http::HttpOracle;

/// Text-to-records service. `Ok(None)` means "no structured data found",
/// which is different from a list that validates to nothing.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn parse(&self, text: &str) -> Result<Option<Vec<RawProductRecord>>, OracleError>;
}

/// One product as the oracle reported it. Unknown keys are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProductRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub price: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RawProductRecord {
    #[cfg(test)]
    pub fn named(name: &str, price: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            price: Some(price.to_string()),
            ..Default::default()
        }
    }

    /// A record is usable only with a name and a price.
    pub fn is_valid(&self) -> bool {
        let present = |field: &Option<String>| field.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false);
        present(&self.name) && present(&self.price)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Outcome of running the oracle over every chunk of one text.
#[derive(Debug, Clone, Default)]
pub struct OracleRun {
    pub records: Vec<RawProductRecord>,
    pub chunks: usize,
    /// Chunks that produced nothing (None, error or timeout)
    pub empty_chunks: usize,
}

/// Parses each chunk independently. A failing chunk is logged and skipped;
/// records without a name or a price are dropped. Duplicates are left in
/// place for the session collapse, which keys them by fingerprint.
pub async fn parse_chunks(oracle: &dyn Oracle, chunks: &[&str], call_timeout: Duration) -> OracleRun {
    let mut run = OracleRun {
        chunks: chunks.len(),
        ..Default::default()
    };
    for (i, chunk) in chunks.iter().enumerate() {
        let parsed = match tokio::time::timeout(call_timeout, oracle.parse(chunk)).await {
            Ok(Ok(Some(records))) => records,
            Ok(Ok(None)) => {
                tracing::debug!("Chunk {}/{}: no structured data", i + 1, chunks.len());
                run.empty_chunks += 1;
                continue;
            }
            Ok(Err(e)) => {
                tracing::warn!("Chunk {}/{}: oracle error: {}", i + 1, chunks.len(), e);
                run.empty_chunks += 1;
                continue;
            }
            Err(_) => {
                tracing::warn!("Chunk {}/{}: oracle timed out after {:?}", i + 1, chunks.len(), call_timeout);
                run.empty_chunks += 1;
                continue;
            }
        };

        let before = run.records.len();
        run.records.extend(parsed.into_iter().filter(RawProductRecord::is_valid));
        tracing::debug!("Chunk {}/{}: {} valid records", i + 1, chunks.len(), run.records.len() - before);
    }

    run
}

/// Splits `text` and parses every chunk.
pub async fn parse_text(oracle: &dyn Oracle, text: &str, call_timeout: Duration) -> OracleRun {
    let chunks = split_for_oracle(text);
    parse_chunks(oracle, &chunks, call_timeout).await
}
