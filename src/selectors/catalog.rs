// src/selectors/catalog.rs
use crate::selectors::{NewSelector, WILDCARD_DOMAIN};

/// Pre-seeded retailer candidates: (domain, container expression, quality, success rate).
const DOMAIN_DEFAULTS: &[(&str, &str, u32, f64)] = &[
    ("amazon.it", "[data-component-type='s-search-result']", 1000, 0.95),
    ("unieuro.it", "[class*='product-card']", 900, 0.90),
    ("mediaworld.it", "[class*='product-item']", 850, 0.88),
    ("euronics.it", "[class*='product-card']", 800, 0.85),
    ("trony.it", "[class*='product-item']", 750, 0.82),
    ("conad.it", "[class*='product-card']", 700, 0.80),
    ("carrefour.it", "[class*='product-item']", 650, 0.78),
    ("esselunga.it", "[class*='product-card']", 600, 0.75),
    ("immobiliare.it", "[class*='listing-item']", 550, 0.70),
    ("casa.it", "[class*='property-card']", 500, 0.65),
];

/// Pre-seeded wildcard candidates, tried on every domain.
const WILDCARD_DEFAULTS: &[(&str, u32, f64)] = &[
    ("[class*='product-card']", 800, 0.85),
    ("[class*='product-item']", 750, 0.80),
    ("[data-testid*='product']", 700, 0.75),
    ("[class*='product']", 650, 0.70),
    ("article", 500, 0.60),
];

/// Generic expressions probed when no stored candidate matches.
pub const PROBE_CATALOG: &[&str] = &[
    // Product / listing containers
    "[class*='product']",
    "[class*='item']",
    "[class*='card']",
    "[class*='listing']",
    "[class*='result']",
    "[class*='entry']",
    "[data-testid*='product']",
    "[data-testid*='item']",
    "[data-testid*='card']",
    "article",
    "li",
    // Layout boxes
    "[class*='tile']",
    "[class*='box']",
    // Real estate
    "[class*='property']",
    "[class*='house']",
    "[class*='apartment']",
    "[class*='real-estate']",
    // Broad fallbacks
    "section[class]",
    "article[class]",
    "li[class]",
    "div[class]",
];

pub fn default_candidates() -> Vec<NewSelector> {
    let domain_rows = DOMAIN_DEFAULTS
        .iter()
        .map(|(domain, expression, quality, rate)| NewSelector {
            domain: domain.to_string(),
            expression: expression.to_string(),
            quality_score: *quality,
            success_rate: *rate,
        });

    let wildcard_rows = WILDCARD_DEFAULTS
        .iter()
        .map(|(expression, quality, rate)| NewSelector {
            domain: WILDCARD_DOMAIN.to_string(),
            expression: expression.to_string(),
            quality_score: *quality,
            success_rate: *rate,
        });

    domain_rows.chain(wildcard_rows).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    #[test]
    fn every_catalog_expression_parses() {
        for row in default_candidates() {
            assert!(Selector::parse(&row.expression).is_ok(), "{}", row.expression);
        }
        for expression in PROBE_CATALOG {
            assert!(Selector::parse(expression).is_ok(), "{}", expression);
        }
    }

    #[test]
    fn defaults_include_wildcards() {
        let rows = default_candidates();
        let wildcards = rows.iter().filter(|r| r.domain == WILDCARD_DOMAIN).count();
        assert_eq!(wildcards, WILDCARD_DEFAULTS.len());
        assert_eq!(rows.len(), DOMAIN_DEFAULTS.len() + WILDCARD_DEFAULTS.len());
    }
}
