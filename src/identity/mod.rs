// src/identity/mod.rs
pub mod fingerprint;
pub mod merge;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::oracle::RawProductRecord;
use crate::storage::{Persistence, Write};
use crate::utils::error::StorageError;

pub use fingerprint::fingerprint;
pub use merge::{collapse_session, merge_policy, MergeDecision};

/// First 16 hex chars of a SHA-256 over a record's normalized fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique key of a stored product. Two domains never share a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductKey {
    pub domain: String,
    pub fingerprint: Fingerprint,
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.domain, self.fingerprint)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProduct {
    pub key: ProductKey,
    pub name: String,
    pub brand: Option<String>,
    pub url: Option<String>,
    pub price_text: String,
    pub price: Option<f64>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// An oracle record after fingerprinting, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRecord {
    pub fingerprint: Fingerprint,
    pub price_value: Option<f64>,
    #[serde(flatten)]
    pub record: RawProductRecord,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub inserted: usize,
    pub price_updated: usize,
    pub unchanged: usize,
}

/// Turns a session's oracle output into fingerprinted records and merges
/// them into the product table.
#[derive(Clone)]
pub struct IdentityEngine {
    backend: Arc<dyn Persistence>,
}

impl IdentityEngine {
    pub fn new(backend: Arc<dyn Persistence>) -> Self {
        Self { backend }
    }

    pub async fn merge(
        &self,
        domain: &str,
        records: Vec<RawProductRecord>,
    ) -> Result<(Vec<ProductRecord>, MergeReport), StorageError> {
        let collapsed = collapse_session(records);
        let mut report = MergeReport::default();

        for incoming in &collapsed {
            let key = ProductKey {
                domain: domain.to_string(),
                fingerprint: incoming.fingerprint.clone(),
            };
            let now = Utc::now();

            let change = self
                .backend
                .modify_product(&key, &|existing: Option<&StoredProduct>| {
                    match merge_policy(&key, existing, incoming, now) {
                        MergeDecision::Insert(row) | MergeDecision::UpdatePrice(row) => Write::Put(row),
                        MergeDecision::Unchanged => Write::Keep,
                    }
                })
                .await?;

            match (&change.before, &change.after) {
                (None, Some(_)) => report.inserted += 1,
                (Some(before), Some(after)) if before != after => {
                    tracing::info!(
                        "Price change for {}: {} -> {}",
                        key,
                        before.price_text,
                        after.price_text
                    );
                    report.price_updated += 1;
                }
                _ => report.unchanged += 1,
            }
        }

        tracing::info!(
            "Merged {} records for {}: {} new, {} price changes, {} unchanged",
            collapsed.len(),
            domain,
            report.inserted,
            report.price_updated,
            report.unchanged
        );
        Ok((collapsed, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonStore;

    fn engine() -> (IdentityEngine, Arc<JsonStore>) {
        let backend = Arc::new(JsonStore::in_memory());
        (IdentityEngine::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn scenario_variants_collapse_to_one_row() {
        let (engine, backend) = engine();
        let (records, report) = engine
            .merge(
                "shop.it",
                vec![
                    RawProductRecord::named("Iphone 15 Pro 128Gb Nero", "€1.149,00"),
                    RawProductRecord::named("iPhone 15 PRO 128GB nero", "€1.099,00"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(report, MergeReport { inserted: 1, price_updated: 0, unchanged: 0 });

        let rows = backend.list_products("shop.it").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, Some(1099.0));
    }

    #[tokio::test]
    async fn merging_twice_changes_nothing_the_second_time() {
        let (engine, backend) = engine();
        let batch = vec![
            RawProductRecord::named("Pixel 8", "€699"),
            RawProductRecord::named("Galaxy S24", "€799"),
        ];

        engine.merge("shop.it", batch.clone()).await.unwrap();
        let after_first = backend.list_products("shop.it").await.unwrap();

        let (_, report) = engine.merge("shop.it", batch).await.unwrap();
        assert_eq!(report, MergeReport { inserted: 0, price_updated: 0, unchanged: 2 });
        assert_eq!(backend.list_products("shop.it").await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn price_change_updates_in_place() {
        let (engine, backend) = engine();
        engine.merge("shop.it", vec![RawProductRecord::named("Pixel 8", "€699")]).await.unwrap();
        let (records, report) = engine
            .merge("shop.it", vec![RawProductRecord::named("pixel 8", "€649")])
            .await
            .unwrap();

        assert_eq!(report.price_updated, 1);
        let key = ProductKey {
            domain: "shop.it".to_string(),
            fingerprint: records[0].fingerprint.clone(),
        };
        let row = backend.get_product(&key).await.unwrap().unwrap();
        assert_eq!(row.price, Some(649.0));
        assert!(row.last_seen >= row.first_seen);
    }

    #[tokio::test]
    async fn same_fingerprint_on_two_domains_stays_separate() {
        let (engine, backend) = engine();
        engine.merge("a.it", vec![RawProductRecord::named("Pixel 8", "€699")]).await.unwrap();
        let (_, report) = engine.merge("b.it", vec![RawProductRecord::named("Pixel 8", "€599")]).await.unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(backend.list_products("a.it").await.unwrap()[0].price, Some(699.0));
        assert_eq!(backend.list_products("b.it").await.unwrap()[0].price, Some(599.0));
    }
}
