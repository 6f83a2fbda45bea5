// src/identity/merge.rs
use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::identity::{fingerprint, ProductKey, ProductRecord, StoredProduct};
use crate::oracle::RawProductRecord;
use crate::utils::text::parse_price;

/// What to do with one incoming record against the stored row for its key.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision {
    Insert(StoredProduct),
    UpdatePrice(StoredProduct),
    Unchanged,
}

/// Fingerprints a session's records and collapses duplicates, keeping the
/// lower price. A parsed price always beats an unparseable one. First-seen
/// order is preserved.
pub fn collapse_session(records: Vec<RawProductRecord>) -> Vec<ProductRecord> {
    let mut collapsed: Vec<ProductRecord> = Vec::with_capacity(records.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let incoming = ProductRecord {
            fingerprint: fingerprint(&record),
            price_value: record.price.as_deref().and_then(parse_price),
            record,
        };

        match index.get(&incoming.fingerprint.0) {
            Some(&pos) => {
                if cheaper(&incoming, &collapsed[pos]) {
                    tracing::debug!(
                        "Duplicate {} in session: keeping lower price {:?}",
                        incoming.fingerprint,
                        incoming.record.price
                    );
                    collapsed[pos] = incoming;
                }
            }
            None => {
                index.insert(incoming.fingerprint.0.clone(), collapsed.len());
                collapsed.push(incoming);
            }
        }
    }

    collapsed
}

fn cheaper(a: &ProductRecord, b: &ProductRecord) -> bool {
    match (a.price_value, b.price_value) {
        (Some(x), Some(y)) => x.partial_cmp(&y) == Some(Ordering::Less),
        (Some(_), None) => true,
        _ => false,
    }
}

fn same_price(stored: &StoredProduct, incoming: &ProductRecord) -> bool {
    match (stored.price, incoming.price_value) {
        (Some(a), Some(b)) => (a - b).abs() < 0.005,
        _ => stored.price_text.trim() == incoming.record.price.as_deref().unwrap_or_default().trim(),
    }
}

/// Decides how `incoming` lands on the row stored under `key`. Applying the
/// same record twice ends in the same state as applying it once.
pub fn merge_policy(
    key: &ProductKey,
    existing: Option<&StoredProduct>,
    incoming: &ProductRecord,
    now: DateTime<Utc>,
) -> MergeDecision {
    let price_text = incoming.record.price.clone().unwrap_or_default();

    match existing {
        None => MergeDecision::Insert(StoredProduct {
            key: key.clone(),
            name: incoming.record.name.clone().unwrap_or_default(),
            brand: incoming.record.brand.clone(),
            url: incoming.record.url.clone(),
            price_text,
            price: incoming.price_value,
            first_seen: now,
            last_seen: now,
        }),
        Some(stored) if same_price(stored, incoming) => MergeDecision::Unchanged,
        Some(stored) => {
            let mut updated = stored.clone();
            updated.price_text = price_text;
            updated.price = incoming.price_value;
            updated.last_seen = now;
            MergeDecision::UpdatePrice(updated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Fingerprint;

    fn key(domain: &str) -> ProductKey {
        ProductKey {
            domain: domain.to_string(),
            fingerprint: Fingerprint("0011223344556677".to_string()),
        }
    }

    fn sighting(name: &str, price: &str) -> ProductRecord {
        collapse_session(vec![RawProductRecord::named(name, price)]).remove(0)
    }

    #[test]
    fn session_duplicates_keep_the_lower_price() {
        let collapsed = collapse_session(vec![
            RawProductRecord::named("Iphone 15 Pro 128Gb Nero", "€1.199,00"),
            RawProductRecord::named("Samsung Galaxy S24", "€799,00"),
            RawProductRecord::named("iPhone 15 PRO 128GB nero", "€1.099,00"),
        ]);

        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].record.price.as_deref(), Some("€1.099,00"));
        assert_eq!(collapsed[0].price_value, Some(1099.0));
        assert_eq!(collapsed[1].record.name.as_deref(), Some("Samsung Galaxy S24"));
    }

    #[test]
    fn parsed_price_beats_unparseable() {
        let collapsed = collapse_session(vec![
            RawProductRecord::named("Kettle", "su richiesta"),
            RawProductRecord::named("kettle", "€35"),
            RawProductRecord::named("KETTLE", "non disponibile"),
        ]);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].price_value, Some(35.0));
    }

    #[test]
    fn policy_inserts_updates_and_skips() {
        let t0 = Utc::now();
        let first = sighting("Pixel 8", "€699");

        let stored = match merge_policy(&key("a.it"), None, &first, t0) {
            MergeDecision::Insert(row) => row,
            other => panic!("expected insert, got {:?}", other),
        };
        assert_eq!(stored.price, Some(699.0));
        assert_eq!(stored.first_seen, t0);

        // Same price written differently is not a change
        let same = sighting("Pixel 8", "699,00 €");
        assert_eq!(merge_policy(&key("a.it"), Some(&stored), &same, Utc::now()), MergeDecision::Unchanged);

        let t1 = t0 + chrono::Duration::hours(1);
        let cheaper = sighting("Pixel 8", "€649");
        match merge_policy(&key("a.it"), Some(&stored), &cheaper, t1) {
            MergeDecision::UpdatePrice(row) => {
                assert_eq!(row.price, Some(649.0));
                assert_eq!(row.first_seen, t0);
                assert_eq!(row.last_seen, t1);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn policy_is_idempotent() {
        let now = Utc::now();
        let incoming = sighting("Pixel 8", "€649");
        let stored = sighting("Pixel 8", "€699");
        let stored = match merge_policy(&key("a.it"), None, &stored, now) {
            MergeDecision::Insert(row) => row,
            other => panic!("expected insert, got {:?}", other),
        };

        let once = match merge_policy(&key("a.it"), Some(&stored), &incoming, now) {
            MergeDecision::UpdatePrice(row) => row,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(merge_policy(&key("a.it"), Some(&once), &incoming, now), MergeDecision::Unchanged);
    }
}
