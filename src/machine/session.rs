// src/machine/session.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{MergeReport, ProductRecord};
use crate::machine::state::{Event, ReasonCode, State, Strategy};
use crate::mitigator::ProtectionReport;
use crate::selectors::SelectorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Success,
    Failure,
}

/// Closed record of one `extract` call. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSession {
    pub url: String,
    pub domain: String,
    pub strategy_used: Option<Strategy>,
    pub status: SessionStatus,
    pub reason: Option<ReasonCode>,
    pub products_found: usize,
    pub selector_id: Option<SelectorId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: State,
    pub event: Event,
    pub to: State,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub transitions: Vec<TransitionRecord>,
    pub attempts: usize,
    pub gate_wait_ms: u64,
    pub page_chars: usize,
    pub challenge_detected: bool,
    /// `Some` once a dismissal pass ran
    pub challenge_resolved: Option<bool>,
    /// Challenge flagged but the page already carried usable content
    pub false_positive: bool,
    pub protection: Option<ProtectionReport>,
    pub candidates_tried: usize,
    pub selector_id: Option<SelectorId>,
    pub selector_expression: Option<String>,
    pub learned_selector: Option<SelectorId>,
    pub containers_found: usize,
    pub chunks: usize,
    pub empty_chunks: usize,
    pub merge: Option<MergeReport>,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

/// What `extract` hands back. Always populated, even on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractResult {
    pub url: String,
    pub status: SessionStatus,
    pub records: Vec<ProductRecord>,
    pub strategy_used: Option<Strategy>,
    pub reason: Option<ReasonCode>,
    pub diagnostics: Diagnostics,
}

impl ExtractResult {
    pub fn is_success(&self) -> bool {
        self.status == SessionStatus::Success
    }
}
