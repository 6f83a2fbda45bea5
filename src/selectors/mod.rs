// src/selectors/mod.rs
pub mod catalog;
pub mod classify;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use store::{LearnOutcome, SelectorStore};

/// Domain under which wildcard candidates are stored.
pub const WILDCARD_DOMAIN: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SelectorId(pub u64);

impl std::fmt::Display for SelectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A ranked container expression for one domain (or the wildcard).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorCandidate {
    pub id: SelectorId,
    pub domain: String,
    pub expression: String,
    pub quality_score: u32,
    pub success_rate: f64,
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SelectorCandidate {
    pub fn is_wildcard(&self) -> bool {
        self.domain == WILDCARD_DOMAIN
    }
}

/// Row data for a candidate that has not been assigned an id yet.
#[derive(Debug, Clone)]
pub struct NewSelector {
    pub domain: String,
    pub expression: String,
    pub quality_score: u32,
    pub success_rate: f64,
}
