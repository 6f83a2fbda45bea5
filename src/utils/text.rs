// src/utils/text.rs
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

// --- Limits applied when cleaning page text for the oracle ---
const MAX_LINE_CHARS: usize = 200;
const MAX_CHAR_RUN: usize = 20;

// --- Regex Patterns (Lazy Static) ---
static LONG_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://\S{100,}").expect("Failed to compile LONG_LINK_RE")
});

// Tracking parameters with very long keys and values
static LONG_QUERY_PARAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[?&][^=\s]{50,}=[^&\s]{50,}").expect("Failed to compile LONG_QUERY_PARAM_RE")
});

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s+").expect("Failed to compile WHITESPACE_RE")
});

static PRICE_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d[\d.,\s]*\d|\d").expect("Failed to compile PRICE_NUMBER_RE")
});

/// Extracts the partition key for a URL: its lowercased host with a leading
/// `www.` removed.
pub fn domain_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    let domain = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

/// Collapses every whitespace run to a single space and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Returns at most `max` characters of `text` (never splits a code point).
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Cleans raw page text before it is handed to the oracle. Long links and
/// tracking parameters are dropped, runs of a repeated character shortened
/// and overlong lines truncated. Line breaks survive; blank lines do not.
pub fn clean_page_text(text: &str) -> String {
    let text = LONG_LINK_RE.replace_all(text, "[LINK]");
    let text = LONG_QUERY_PARAM_RE.replace_all(&text, "");
    let text = squeeze_char_runs(&text);

    let lines: Vec<String> = text
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.chars().count() > MAX_LINE_CHARS {
                format!("{}...", truncate_chars(&line, MAX_LINE_CHARS).trim_end())
            } else {
                line
            }
        })
        .collect();

    lines.join("\n")
}

/// Replaces runs of more than `MAX_CHAR_RUN` identical alphanumeric
/// characters with a single occurrence (filler like "xxxxxxxx...").
fn squeeze_char_runs(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        if c.is_ascii_alphanumeric() && run > MAX_CHAR_RUN {
            out.push(c);
        } else {
            for _ in 0..run {
                out.push(c);
            }
        }
        i += run;
    }
    out
}

/// Parses a human-formatted price ("€1.099,90", "1,099.90", "$19.99",
/// "799 €") into a number. Returns `None` when no digits are present.
pub fn parse_price(text: &str) -> Option<f64> {
    let raw = PRICE_NUMBER_RE.find(text)?.as_str();
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    let last_dot = compact.rfind('.');
    let last_comma = compact.rfind(',');

    let normalized = match (last_dot, last_comma) {
        // Both separators present: whichever comes last is the decimal mark
        (Some(dot), Some(comma)) => {
            if comma > dot {
                compact.replace('.', "").replace(',', ".")
            } else {
                compact.replace(',', "")
            }
        }
        (None, Some(comma)) => {
            if is_thousands_group(&compact, comma, ',') {
                compact.replace(',', "")
            } else {
                compact.replace(',', ".")
            }
        }
        (Some(dot), None) => {
            if is_thousands_group(&compact, dot, '.') {
                compact.replace('.', "")
            } else {
                compact
            }
        }
        (None, None) => compact,
    };

    normalized.parse::<f64>().ok()
}

/// A separator is a thousands separator when exactly three digits follow its
/// last occurrence, or when it appears more than once.
fn is_thousands_group(number: &str, last_pos: usize, sep: char) -> bool {
    let trailing = number.len() - last_pos - 1;
    number.matches(sep).count() > 1 || trailing == 3
}
