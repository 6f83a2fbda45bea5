// src/identity/fingerprint.rs
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::identity::Fingerprint;
use crate::oracle::RawProductRecord;
use crate::utils::text::{collapse_whitespace, truncate_chars};

const DESCRIPTION_CHARS: usize = 100;
const FINGERPRINT_HEX_LEN: usize = 16;
const FIELD_SEPARATOR: &str = "|";

// --- Regex Patterns (Lazy Static) ---
static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^\p{L}\p{N}.,]+").expect("Failed to compile NON_WORD_RE")
});

static MEMORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d+)\s*(gb|tb)\b").expect("Failed to compile MEMORY_RE")
});

// Colour words in the catalog languages, mapped to one canonical token.
const COLORS: &[(&str, &str)] = &[
    ("nero", "black"),
    ("black", "black"),
    ("bianco", "white"),
    ("white", "white"),
    ("rosso", "red"),
    ("red", "red"),
    ("blu", "blue"),
    ("blue", "blue"),
    ("verde", "green"),
    ("green", "green"),
    ("giallo", "yellow"),
    ("yellow", "yellow"),
    ("grigio", "grey"),
    ("grey", "grey"),
    ("gray", "grey"),
    ("argento", "silver"),
    ("silver", "silver"),
    ("oro", "gold"),
    ("gold", "gold"),
    ("rosa", "pink"),
    ("pink", "pink"),
    ("viola", "purple"),
    ("purple", "purple"),
    ("titanio", "titanium"),
    ("titanium", "titanium"),
];

/// Lowercases, strips punctuation (decimal marks survive) and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    collapse_whitespace(&NON_WORD_RE.replace_all(&lower, " "))
}

fn memory_token(normalized_name: &str) -> String {
    MEMORY_RE
        .captures(normalized_name)
        .map(|caps| format!("{}{}", &caps[1], &caps[2]))
        .unwrap_or_default()
}

fn color_token(normalized_name: &str) -> String {
    normalized_name
        .split(' ')
        .find_map(|word| COLORS.iter().find(|(w, _)| *w == word).map(|(_, c)| c.to_string()))
        .unwrap_or_default()
}

fn field(value: Option<&str>) -> String {
    value.map(normalize).unwrap_or_default()
}

/// Stable identity for a record. Every field is read by name, so key order in
/// the oracle payload never matters; a missing field is an empty token.
pub fn fingerprint(record: &RawProductRecord) -> Fingerprint {
    let name = field(record.name.as_deref());
    let description = truncate_chars(&field(record.description.as_deref()), DESCRIPTION_CHARS);
    let weight = record
        .extra
        .get("weight")
        .and_then(|v| v.as_str().map(normalize).or_else(|| v.as_f64().map(|n| n.to_string())))
        .unwrap_or_default();

    let canonical = [
        name.clone(),
        field(record.brand.as_deref()),
        field(record.model.as_deref()),
        field(record.category.as_deref()),
        weight,
        memory_token(&name),
        color_token(&name),
        description,
    ]
    .join(FIELD_SEPARATOR);

    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_HEX_LEN);
    tracing::trace!("Fingerprint {} for '{}'", hex, canonical);
    Fingerprint(hex)
}
