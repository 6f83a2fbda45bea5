// src/mitigator/mod.rs
use std::time::Duration;

use serde::Serialize;

use crate::config::ChallengeTiming;
use crate::navigator::Page;

// --- Detection vocabulary ---
// Provider and captcha wording; rarely appears on a normal catalog page.
const STRONG_INDICATORS: &[&str] = &[
    "captcha",
    "recaptcha",
    "verification",
    "human verification",
    "verify you are human",
    "robot check",
    "bot detection",
    "security check",
    "cloudflare",
    "checking your browser",
    "ddos protection",
    "rate limit",
    "access denied",
    "blocked",
    "challenge",
];

// Generic stall words; only meaningful next to a strong indicator.
const WEAK_INDICATORS: &[&str] = &["please wait", "loading", "robot", "human", "security", "protection"];

// A single strong hit is enough when it names one of these.
const PROVIDER_SIGNATURES: &[&str] = &["cloudflare"];

// Phrases that mean the interstitial is still up after a dismissal attempt.
const STILL_CHALLENGED: &[&str] = &["checking your browser", "challenge"];

// --- Page probes ---
// Elements that betray an interstitial in the document structure.
const CHALLENGE_ELEMENTS: &[&str] = &[
    "iframe[src*='challenges']",
    "[data-testid='challenge-stage']",
    ".cf-browser-verification",
    "#challenge-form",
    "[class*='challenge']",
    "div[class*='cf-']",
    "form[action*='challenge']",
    "[class*='verification']",
    "[class*='captcha']",
];

// Controls that usually dismiss an interstitial.
const DISMISS_CONTROLS: &[&str] = &[
    "input[type='submit']",
    "button[type='submit']",
    "button[class*='cf-']",
    "button[class*='challenge']",
];

// --- Content sufficiency ---
const MIN_SUFFICIENT_CHARS: usize = 1000;
const CONTENT_KEYWORDS: &[&str] = &["€", "prezzo", "price", "product", "prodotto", "acquista", "buy", "mq", "metri"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub strong: usize,
    pub weak: usize,
    pub challenged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionKind {
    Cloudflare,
    Captcha,
    RateLimit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionLevel {
    None,
    Low,
    Medium,
    High,
}

/// Coarse description of the anti-automation layer in front of a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectionReport {
    pub protected: bool,
    pub level: ProtectionLevel,
    pub kind: ProtectionKind,
    pub suggestion: &'static str,
}

/// Classifies challenge pages and makes one bounded attempt to get past them.
#[derive(Debug, Clone, Default)]
pub struct Mitigator;

impl Mitigator {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, page_text: &str) -> Detection {
        let lower = page_text.to_lowercase();
        let strong = count_present(&lower, STRONG_INDICATORS);
        let weak = count_present(&lower, WEAK_INDICATORS);
        let provider = PROVIDER_SIGNATURES.iter().any(|sig| lower.contains(sig));

        let challenged = strong >= 2 || (strong == 1 && (weak >= 2 || provider));
        if challenged {
            tracing::debug!("Challenge indicators: {} strong, {} weak", strong, weak);
        }

        Detection { strong, weak, challenged }
    }

    /// True when the text already carries enough catalog content to work with.
    pub fn content_sufficient(&self, page_text: &str) -> bool {
        let trimmed = page_text.trim();
        if trimmed.chars().count() <= MIN_SUFFICIENT_CHARS {
            return false;
        }
        let lower = trimmed.to_lowercase();
        CONTENT_KEYWORDS.iter().any(|kw| lower.contains(kw))
    }

    /// One dismissal pass: wait, look for an interstitial, click the first
    /// visible dismiss control, wait again and re-read the page. Every page
    /// call is bounded by `call_timeout`; a failed call counts as unresolved.
    pub async fn resolve(&self, page: &mut dyn Page, timing: &ChallengeTiming, call_timeout: Duration) -> bool {
        tokio::time::sleep(timing.initial_wait).await;

        let mut interstitial = None;
        for expression in CHALLENGE_ELEMENTS {
            match tokio::time::timeout(call_timeout, page.query_all(expression)).await {
                Ok(Ok(found)) if !found.is_empty() => {
                    interstitial = Some(*expression);
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!("Challenge probe '{}' failed: {}", expression, e),
                Err(_) => tracing::debug!("Challenge probe '{}' timed out", expression),
            }
        }

        let Some(marker) = interstitial else {
            tracing::info!("No challenge element on the page after waiting");
            return true;
        };
        tracing::info!("Challenge element present ({}), trying dismiss controls", marker);

        for expression in DISMISS_CONTROLS {
            let visible = match tokio::time::timeout(call_timeout, page.query_all(expression)).await {
                Ok(Ok(found)) => found.iter().any(|el| el.is_visible()),
                _ => false,
            };
            if !visible {
                continue;
            }
            match tokio::time::timeout(call_timeout, page.click(expression)).await {
                Ok(Ok(true)) => {
                    tracing::info!("Clicked dismiss control '{}'", expression);
                    break;
                }
                Ok(Ok(false)) => tracing::debug!("Dismiss control '{}' did not respond", expression),
                Ok(Err(e)) => tracing::debug!("Click on '{}' failed: {}", expression, e),
                Err(_) => tracing::debug!("Click on '{}' timed out", expression),
            }
        }

        tokio::time::sleep(timing.recheck_delay).await;

        match tokio::time::timeout(call_timeout, page.text()).await {
            Ok(Ok(text)) => {
                let lower = text.to_lowercase();
                let cleared = !STILL_CHALLENGED.iter().any(|phrase| lower.contains(phrase));
                if cleared {
                    tracing::info!("Challenge cleared");
                } else {
                    tracing::warn!("Challenge still present after dismissal attempt");
                }
                cleared
            }
            Ok(Err(e)) => {
                tracing::warn!("Could not re-read page after dismissal: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!("Re-reading page after dismissal timed out");
                false
            }
        }
    }

    pub fn protection_report(&self, page_text: &str) -> ProtectionReport {
        let lower = page_text.to_lowercase();

        let (kind, level) = if lower.contains("cloudflare") {
            let level = if lower.contains("checking your browser") {
                ProtectionLevel::High
            } else if lower.contains("ddos protection") {
                ProtectionLevel::Medium
            } else {
                ProtectionLevel::Low
            };
            (ProtectionKind::Cloudflare, level)
        } else if lower.contains("captcha") {
            (ProtectionKind::Captcha, ProtectionLevel::High)
        } else if lower.contains("rate limit") || lower.contains("blocked") {
            (ProtectionKind::RateLimit, ProtectionLevel::Medium)
        } else {
            (ProtectionKind::None, ProtectionLevel::None)
        };

        ProtectionReport {
            protected: level != ProtectionLevel::None,
            level,
            kind,
            suggestion: suggestion(kind, level),
        }
    }
}

fn count_present(haystack: &str, needles: &[&str]) -> usize {
    needles.iter().filter(|needle| haystack.contains(*needle)).count()
}

fn suggestion(kind: ProtectionKind, level: ProtectionLevel) -> &'static str {
    match (kind, level) {
        (ProtectionKind::Cloudflare, ProtectionLevel::Low) => "Change the user agent or add delay between requests",
        (ProtectionKind::Cloudflare, ProtectionLevel::Medium) => "Use a stealthier client and increase request spacing",
        (ProtectionKind::Cloudflare, ProtectionLevel::High) => "Needs manual intervention or a proxy",
        (ProtectionKind::Captcha, _) => "Captcha must be solved manually",
        (ProtectionKind::RateLimit, _) => "Lower the request rate or use a proxy",
        _ => "Try a different client configuration",
    }
}
