// src/selectors/classify.rs
use once_cell::sync::Lazy;
use regex::Regex;

use crate::navigator::ElementHandle;

// --- Constants ---
// Stored candidates must match at most this many containers.
pub const MAX_MATCHES: usize = 100;
// Learned candidates must match at least this many containers.
pub const MIN_LEARN_MATCHES: usize = 3;
// Elements inspected per candidate.
pub const SAMPLE_SIZE: usize = 5;
// Shortest container text worth sending on.
pub const MIN_CONTAINER_TEXT: usize = 20;

const MIN_PRODUCT_TEXT: usize = 30;
const MAX_PRODUCT_TEXT: usize = 2000;
const MIN_INDICATOR_KINDS: usize = 2;

// --- Indicator Patterns (Lazy Static) ---
// Each regex is one kind of evidence; a product-like text shows several kinds.
static PRODUCT_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Currency
        r"(?i)[€$£]|\b(?:eur|usd|gbp|chf)\b",
        // Price vocabulary
        r"(?i)\b(?:prezzo|price|costo|cost|offerta|sconto|sale|iva inclusa)\b",
        // Quantity with unit
        r"(?i)\b\d+(?:[.,]\d+)?\s?(?:kg|g|gb|tb|mb|ml|cl|l|cm|mm|mq|sqm|w|mah|pollici|inch)\b",
        // Purchase action
        r"(?i)add to cart|aggiungi al carrello|\bacquista\b|\bcompra\b|buy now|\bbuy\b|\bcarrello\b|checkout",
        // Availability / delivery
        r"(?i)disponibil|\bavailable\b|in stock|esaurito|out of stock|spedizione|shipping|consegna|delivery",
        // Ratings
        r"(?i)\bstelle\b|\bstars?\b|\brating\b|recension|\breviews?\b",
        // Listing attributes (real estate)
        r"(?i)\b(?:bagn[oi]|bathrooms?|camer[ae]|bedrooms?|locali|bilocale|trilocale|vendita|affitto|rent)\b",
    ]
    .iter()
    .filter_map(|pat| Regex::new(pat).ok())
    .collect()
});

/// Result of probing one expression against a page.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Matched {
        count: usize,
        /// Share of sampled elements that look like products, in [0, 1]
        sample_quality: f64,
    },
    NoMatch,
}

/// Summary of the first `SAMPLE_SIZE` elements of a match set.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStats {
    pub sampled: usize,
    pub valid: usize,
    pub mean_valid_len: f64,
}

/// Content classifier: does this text read like a product or listing card?
pub fn looks_like_product(text: &str) -> bool {
    let trimmed = text.trim();
    let len = trimmed.chars().count();
    if len <= MIN_PRODUCT_TEXT || len >= MAX_PRODUCT_TEXT {
        return false;
    }

    let kinds = PRODUCT_INDICATORS
        .iter()
        .filter(|re| re.is_match(trimmed))
        .count();
    kinds >= MIN_INDICATOR_KINDS
}

pub fn sample(elements: &[ElementHandle]) -> SampleStats {
    let sampled = elements.iter().take(SAMPLE_SIZE);
    let mut stats = SampleStats {
        sampled: 0,
        valid: 0,
        mean_valid_len: 0.0,
    };
    let mut total_len = 0usize;

    for element in sampled {
        stats.sampled += 1;
        let text = element.inner_text();
        if text.trim().chars().count() > MIN_CONTAINER_TEXT && looks_like_product(text) {
            stats.valid += 1;
            total_len += text.trim().chars().count();
        }
    }

    if stats.valid > 0 {
        stats.mean_valid_len = total_len as f64 / stats.valid as f64;
    }
    stats
}

/// Probe predicate for candidates already in the store: between 1 and
/// `MAX_MATCHES` containers, the first carrying real text.
pub fn probe_stored(elements: &[ElementHandle]) -> ProbeOutcome {
    if elements.is_empty() || elements.len() > MAX_MATCHES {
        return ProbeOutcome::NoMatch;
    }
    if elements[0].inner_text().trim().chars().count() <= MIN_CONTAINER_TEXT {
        return ProbeOutcome::NoMatch;
    }

    let stats = sample(elements);
    ProbeOutcome::Matched {
        count: elements.len(),
        sample_quality: ratio(stats.valid, stats.sampled),
    }
}

/// Probe predicate for expressions that are not stored yet: the match count
/// must sit inside `[MIN_LEARN_MATCHES, MAX_MATCHES]` and at least 60% of the
/// sample (and no fewer than two elements) must look like products.
pub fn probe_learnable(elements: &[ElementHandle]) -> ProbeOutcome {
    if elements.len() < MIN_LEARN_MATCHES || elements.len() > MAX_MATCHES {
        return ProbeOutcome::NoMatch;
    }

    let stats = sample(elements);
    let quality = ratio(stats.valid, stats.sampled);
    if stats.valid >= 2 && quality >= 0.6 {
        ProbeOutcome::Matched {
            count: elements.len(),
            sample_quality: quality,
        }
    } else {
        ProbeOutcome::NoMatch
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles(texts: &[&str]) -> Vec<ElementHandle> {
        texts.iter().map(|t| ElementHandle::new(*t)).collect()
    }

    const PHONE: &str = "Samsung Galaxy S24 128GB Nero - €799,00 - Aggiungi al carrello";
    const TV: &str = "LG OLED 55 pollici C3 - Prezzo 1.299,00 € - Disponibile in negozio";
    const FLAT: &str = "Trilocale in vendita, Via Roma 12, 85 mq, 2 bagni - 249.000 €";

    #[test]
    fn product_cards_pass_the_classifier() {
        assert!(looks_like_product(PHONE));
        assert!(looks_like_product(TV));
        assert!(looks_like_product(FLAT));
    }

    #[test]
    fn navigation_text_fails_the_classifier() {
        assert!(!looks_like_product("Home > Smartphone > Android"));
        assert!(!looks_like_product("Chi siamo Lavora con noi Contatti Assistenza clienti"));
        // Too short even with a price
        assert!(!looks_like_product("€9 buy"));
    }

    #[test]
    fn stored_probe_requires_text_in_first_container() {
        assert_eq!(probe_stored(&[]), ProbeOutcome::NoMatch);
        assert_eq!(probe_stored(&handles(&["short", PHONE])), ProbeOutcome::NoMatch);

        match probe_stored(&handles(&[PHONE, TV, "Newsletter signup for offers"])) {
            ProbeOutcome::Matched { count, sample_quality } => {
                assert_eq!(count, 3);
                assert!((sample_quality - 2.0 / 3.0).abs() < 1e-9);
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn learn_probe_enforces_window_and_ratio() {
        // Below the window
        assert_eq!(probe_learnable(&handles(&[PHONE, TV])), ProbeOutcome::NoMatch);

        // Above the window
        let many: Vec<ElementHandle> = (0..101).map(|_| ElementHandle::new(PHONE)).collect();
        assert_eq!(probe_learnable(&many), ProbeOutcome::NoMatch);

        // 2 of 5 valid is under 60%
        let mixed = handles(&[PHONE, TV, "Menu", "Footer links", "Cookie policy"]);
        assert_eq!(probe_learnable(&mixed), ProbeOutcome::NoMatch);

        // 3 of 4 valid
        let good = handles(&[PHONE, TV, FLAT, "Cookie policy"]);
        assert!(matches!(
            probe_learnable(&good),
            ProbeOutcome::Matched { count: 4, .. }
        ));
    }

    #[test]
    fn sample_only_inspects_first_elements() {
        let mut texts = vec!["Menu"; 5];
        texts.extend([PHONE, TV, FLAT]);
        let stats = sample(&handles(&texts));
        assert_eq!(stats.sampled, 5);
        assert_eq!(stats.valid, 0);
    }
}
