// src/selectors/store.rs
use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::navigator::ElementHandle;
use crate::selectors::catalog;
use crate::selectors::classify::{self, ProbeOutcome};
use crate::selectors::{NewSelector, SelectorCandidate, SelectorId, WILDCARD_DOMAIN};
use crate::storage::{Persistence, Write};
use crate::utils::error::StorageError;

// --- Feedback constants ---
const SUCCESS_BONUS_PER_PRODUCT: u32 = 10;
const SUCCESS_BONUS_CAP: u32 = 200;
const FAILURE_PENALTY: u32 = 50;
/// Rows whose quality drops below this are deleted.
pub const QUALITY_FLOOR: u32 = 50;
pub const MAX_QUALITY: u32 = 10_000;
const MAX_LEARNED_QUALITY: f64 = 1000.0;

const RATE_STEP_LARGE: f64 = 0.1;
const RATE_STEP_SMALL: f64 = 0.05;
const RATE_FAILURE_STEP: f64 = 0.1;
pub const MIN_SUCCESS_RATE: f64 = 0.1;
pub const MAX_SUCCESS_RATE: f64 = 1.0;
const INITIAL_LEARNED_RATE: f64 = 0.5;

// --- Retrieval constants ---
const MIN_OFFERED_RATE: f64 = 0.5;
const STALE_RATE: f64 = 0.3;
const PER_DOMAIN_LIMIT: usize = 10;
const WILDCARD_PAD_BELOW: usize = 5;
const RESULT_LIMIT: usize = 20;

/// Result of a `learn` call.
#[derive(Debug, Clone, PartialEq)]
pub enum LearnOutcome {
    Learned(SelectorCandidate),
    /// The expression was already stored for this domain.
    AlreadyKnown(SelectorCandidate),
    Rejected,
}

impl LearnOutcome {
    pub fn candidate(&self) -> Option<&SelectorCandidate> {
        match self {
            LearnOutcome::Learned(c) | LearnOutcome::AlreadyKnown(c) => Some(c),
            LearnOutcome::Rejected => None,
        }
    }
}

/// Ranked, feedback-driven selector candidates shared by all sessions.
#[derive(Clone)]
pub struct SelectorStore {
    backend: Arc<dyn Persistence>,
}

impl SelectorStore {
    pub fn new(backend: Arc<dyn Persistence>) -> Self {
        Self { backend }
    }

    /// Candidates for `domain` ranked by quality then success rate. When
    /// fewer than five domain rows qualify, wildcard rows are merged in.
    /// A miss is an empty list.
    pub async fn get_candidates(
        &self,
        domain: &str,
        min_quality: u32,
    ) -> Result<Vec<SelectorCandidate>, StorageError> {
        let mut candidates = self.ranked(domain, min_quality).await?;
        tracing::debug!("{} domain-specific candidates for {}", candidates.len(), domain);

        if domain != WILDCARD_DOMAIN && candidates.len() < WILDCARD_PAD_BELOW {
            let wildcards = self.ranked(WILDCARD_DOMAIN, min_quality).await?;
            tracing::debug!("Padding {} with {} wildcard candidates", domain, wildcards.len());
            candidates.extend(wildcards);
            candidates.sort_by(rank);
        }

        candidates.truncate(RESULT_LIMIT);
        Ok(candidates)
    }

    async fn ranked(
        &self,
        domain: &str,
        min_quality: u32,
    ) -> Result<Vec<SelectorCandidate>, StorageError> {
        let mut rows: Vec<SelectorCandidate> = self
            .backend
            .list_selectors(domain)
            .await?
            .into_iter()
            .filter(|row| row.quality_score >= min_quality && row.success_rate >= MIN_OFFERED_RATE)
            .collect();
        rows.sort_by(rank);
        rows.truncate(PER_DOMAIN_LIMIT);
        Ok(rows)
    }

    /// Feeds one extraction result back into a candidate. Returns the
    /// updated row, or `None` when the row was purged (or already gone).
    pub async fn record_outcome(
        &self,
        id: SelectorId,
        success: bool,
        products_found: usize,
    ) -> Result<Option<SelectorCandidate>, StorageError> {
        let now = Utc::now();
        let change = self
            .backend
            .modify_selector(id, &move |row: &SelectorCandidate| {
                let next = apply_outcome(row, success, products_found, now);
                if next.quality_score < QUALITY_FLOOR {
                    Write::Delete
                } else {
                    Write::Put(next)
                }
            })
            .await?;

        match (&change.before, &change.after) {
            (None, _) => tracing::warn!("Outcome for unknown selector {} ignored", id),
            (Some(before), None) => tracing::info!(
                "Purged selector {} ({}) after quality fell to {}",
                id,
                before.expression,
                before.quality_score.saturating_sub(FAILURE_PENALTY)
            ),
            (Some(before), Some(after)) => tracing::debug!(
                "Selector {} quality {} -> {}, success rate {:.2} -> {:.2}",
                id,
                before.quality_score,
                after.quality_score,
                before.success_rate,
                after.success_rate
            ),
        }

        Ok(change.after)
    }

    /// Stores `expression` for `domain` when its matches pass the learn
    /// probe. Initial quality grows with valid samples and their length.
    pub async fn learn(
        &self,
        domain: &str,
        expression: &str,
        elements: &[ElementHandle],
    ) -> Result<LearnOutcome, StorageError> {
        if classify::probe_learnable(elements) == ProbeOutcome::NoMatch {
            tracing::trace!("Not learning '{}' for {}: probe rejected", expression, domain);
            return Ok(LearnOutcome::Rejected);
        }

        let stats = classify::sample(elements);
        let quality = (stats.valid as f64 * 100.0 + stats.mean_valid_len / 10.0).min(MAX_LEARNED_QUALITY);

        let (row, created) = self
            .backend
            .insert_selector(NewSelector {
                domain: domain.to_string(),
                expression: expression.to_string(),
                quality_score: quality as u32,
                success_rate: INITIAL_LEARNED_RATE,
            })
            .await?;

        if created {
            tracing::info!(
                "Learned selector {} for {}: '{}' ({} matches, {} valid samples, quality {})",
                row.id,
                domain,
                expression,
                elements.len(),
                stats.valid,
                row.quality_score
            );
            Ok(LearnOutcome::Learned(row))
        } else {
            Ok(LearnOutcome::AlreadyKnown(row))
        }
    }

    /// Inserts the built-in retailer and wildcard candidates that are not
    /// stored yet. Returns how many rows were created.
    pub async fn seed_defaults(&self) -> Result<usize, StorageError> {
        let mut created = 0;
        for row in catalog::default_candidates() {
            let (_, is_new) = self.backend.insert_selector(row).await?;
            if is_new {
                created += 1;
            }
        }
        tracing::info!("Seeded {} default selector candidates", created);
        Ok(created)
    }

    /// Deletes weak rows that have not been used within `max_age`.
    pub async fn purge_stale(
        &self,
        min_quality: u32,
        max_age: chrono::Duration,
    ) -> Result<usize, StorageError> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;

        for row in self.backend.all_selectors().await? {
            if !is_stale(&row, min_quality, cutoff) {
                continue;
            }
            // Re-check under the row lock; a concurrent success may have revived it
            let change = self
                .backend
                .modify_selector(row.id, &move |current: &SelectorCandidate| {
                    if is_stale(current, min_quality, cutoff) {
                        Write::Delete
                    } else {
                        Write::Keep
                    }
                })
                .await?;
            if change.before.is_some() && change.after.is_none() {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} stale selector candidates", removed);
        }
        Ok(removed)
    }
}

fn rank(a: &SelectorCandidate, b: &SelectorCandidate) -> Ordering {
    b.quality_score
        .cmp(&a.quality_score)
        .then_with(|| b.success_rate.partial_cmp(&a.success_rate).unwrap_or(Ordering::Equal))
        .then_with(|| a.id.cmp(&b.id))
}

fn is_stale(row: &SelectorCandidate, min_quality: u32, cutoff: DateTime<Utc>) -> bool {
    (row.quality_score < min_quality || row.success_rate < STALE_RATE) && row.last_used < cutoff
}

/// Pure feedback update for one row.
pub fn apply_outcome(
    row: &SelectorCandidate,
    success: bool,
    products_found: usize,
    now: DateTime<Utc>,
) -> SelectorCandidate {
    let mut next = row.clone();

    if success {
        let found = u32::try_from(products_found).unwrap_or(u32::MAX);
        let bonus = found.saturating_mul(SUCCESS_BONUS_PER_PRODUCT).min(SUCCESS_BONUS_CAP);
        next.quality_score = next.quality_score.saturating_add(bonus).min(MAX_QUALITY);
        let step = if products_found > 5 { RATE_STEP_LARGE } else { RATE_STEP_SMALL };
        next.success_rate = (next.success_rate + step).min(MAX_SUCCESS_RATE);
    } else {
        next.quality_score = next.quality_score.saturating_sub(FAILURE_PENALTY);
        next.success_rate = (next.success_rate - RATE_FAILURE_STEP).max(MIN_SUCCESS_RATE);
    }

    next.usage_count += 1;
    next.last_used = now;
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonStore;

    const PHONE: &str = "Samsung Galaxy S24 128GB Nero - €799,00 - Aggiungi al carrello";
    const TV: &str = "LG OLED 55 pollici C3 - Prezzo 1.299,00 € - Disponibile in negozio";

    fn store() -> (SelectorStore, Arc<JsonStore>) {
        let backend = Arc::new(JsonStore::in_memory());
        (SelectorStore::new(backend.clone()), backend)
    }

    async fn insert(backend: &JsonStore, domain: &str, expression: &str, quality: u32, rate: f64) -> SelectorId {
        let (row, _) = backend
            .insert_selector(NewSelector {
                domain: domain.to_string(),
                expression: expression.to_string(),
                quality_score: quality,
                success_rate: rate,
            })
            .await
            .unwrap();
        row.id
    }

    #[tokio::test]
    async fn candidates_are_ranked_and_padded_with_wildcards() {
        let (store, backend) = store();
        insert(&backend, "shop.it", ".a", 400, 0.6).await;
        insert(&backend, "shop.it", ".b", 400, 0.9).await;
        insert(&backend, "shop.it", ".weak", 90, 0.9).await;
        insert(&backend, "shop.it", ".unreliable", 900, 0.4).await;
        insert(&backend, "*", "article", 500, 0.6).await;
        insert(&backend, "other.it", ".c", 999, 0.9).await;

        let candidates = store.get_candidates("shop.it", 100).await.unwrap();
        let expressions: Vec<&str> = candidates.iter().map(|c| c.expression.as_str()).collect();
        assert_eq!(expressions, vec!["article", ".b", ".a"]);
    }

    #[tokio::test]
    async fn wildcards_are_not_merged_when_domain_has_enough() {
        let (store, backend) = store();
        for i in 0..5 {
            insert(&backend, "shop.it", &format!(".c{}", i), 300, 0.8).await;
        }
        insert(&backend, "*", "article", 900, 0.9).await;

        let candidates = store.get_candidates("shop.it", 100).await.unwrap();
        assert_eq!(candidates.len(), 5);
        assert!(candidates.iter().all(|c| c.domain == "shop.it"));
    }

    #[tokio::test]
    async fn miss_is_empty_not_error() {
        let (store, _) = store();
        assert!(store.get_candidates("nowhere.it", 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_success_never_lowers_quality_or_exceeds_rate_cap() {
        let (store, backend) = store();
        let id = insert(&backend, "shop.it", ".card", 900, 0.95).await;

        let mut last_quality = 900;
        for n in [1usize, 5, 12, 40, 3, 100, 7] {
            let row = store.record_outcome(id, true, n).await.unwrap().unwrap();
            assert!(row.quality_score >= last_quality);
            assert!(row.success_rate <= 1.0);
            last_quality = row.quality_score;
        }

        let row = backend.get_selector(id).await.unwrap().unwrap();
        assert_eq!(row.success_rate, 1.0);
        assert_eq!(row.usage_count, 7);
    }

    #[tokio::test]
    async fn success_bonus_is_capped() {
        let (store, backend) = store();
        let id = insert(&backend, "shop.it", ".card", 100, 0.5).await;

        let row = store.record_outcome(id, true, 5).await.unwrap().unwrap();
        assert_eq!(row.quality_score, 150);
        assert!((row.success_rate - 0.55).abs() < 1e-9);

        let row = store.record_outcome(id, true, 500).await.unwrap().unwrap();
        assert_eq!(row.quality_score, 350);
        assert!((row.success_rate - 0.65).abs() < 1e-9);
    }

    #[tokio::test]
    async fn repeated_failure_decreases_until_purged() {
        let (store, backend) = store();
        let id = insert(&backend, "shop.it", ".card", 260, 0.9).await;

        let mut last_quality = 260;
        loop {
            match store.record_outcome(id, false, 0).await.unwrap() {
                Some(row) => {
                    assert!(row.quality_score < last_quality);
                    assert!(row.success_rate >= 0.1);
                    last_quality = row.quality_score;
                }
                None => break,
            }
        }

        assert!(backend.get_selector(id).await.unwrap().is_none());
        let candidates = store.get_candidates("shop.it", 0).await.unwrap();
        assert!(candidates.iter().all(|c| c.id != id));
    }

    #[tokio::test]
    async fn concurrent_outcomes_are_not_lost() {
        let (store, backend) = store();
        let id = insert(&backend, "shop.it", ".card", 1000, 0.5).await;

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.record_outcome(id, true, 1).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let row = backend.get_selector(id).await.unwrap().unwrap();
        assert_eq!(row.usage_count, 20);
        assert_eq!(row.quality_score, 1200);
    }

    #[tokio::test]
    async fn learn_accepts_product_like_matches_only() {
        let (store, _) = store();
        let good: Vec<ElementHandle> = [PHONE, TV, PHONE, TV]
            .iter()
            .map(|t| ElementHandle::new(*t))
            .collect();

        let outcome = store.learn("shop.it", ".tile", &good).await.unwrap();
        let learned = match outcome {
            LearnOutcome::Learned(row) => row,
            other => panic!("expected Learned, got {:?}", other),
        };
        // 4 valid samples, mean length well under 1000 chars
        assert!(learned.quality_score >= 400 && learned.quality_score < 500);
        assert_eq!(learned.success_rate, 0.5);

        let again = store.learn("shop.it", ".tile", &good).await.unwrap();
        assert!(matches!(again, LearnOutcome::AlreadyKnown(ref row) if row.id == learned.id));

        let nav: Vec<ElementHandle> = ["Home", "Offerte", "Contatti", "Chi siamo"]
            .iter()
            .map(|t| ElementHandle::new(*t))
            .collect();
        assert_eq!(store.learn("shop.it", "li", &nav).await.unwrap(), LearnOutcome::Rejected);
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let (store, backend) = store();
        let first = store.seed_defaults().await.unwrap();
        assert!(first > 0);
        assert_eq!(store.seed_defaults().await.unwrap(), 0);
        assert_eq!(backend.all_selectors().await.unwrap().len(), first);
    }

    #[tokio::test]
    async fn purge_removes_only_weak_unused_rows() {
        let (store, backend) = store();
        let weak = insert(&backend, "shop.it", ".weak", 80, 0.6).await;
        let strong = insert(&backend, "shop.it", ".strong", 800, 0.9).await;

        // Nothing is old enough yet
        assert_eq!(store.purge_stale(100, chrono::Duration::days(30)).await.unwrap(), 0);

        // A negative age puts the cutoff in the future
        assert_eq!(store.purge_stale(100, chrono::Duration::seconds(-60)).await.unwrap(), 1);
        assert!(backend.get_selector(weak).await.unwrap().is_none());
        assert!(backend.get_selector(strong).await.unwrap().is_some());
    }
}
