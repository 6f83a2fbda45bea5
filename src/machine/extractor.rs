// src/machine/extractor.rs
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use url::Url;

use crate::config::ExtractOptions;
use crate::identity::{collapse_session, IdentityEngine, ProductRecord};
use crate::machine::rate_gate::RateGate;
use crate::machine::session::{
    Diagnostics, ExtractResult, ExtractionSession, SessionStatus, TransitionRecord,
};
use crate::machine::state::{advance, Event, ReasonCode, State, Strategy};
use crate::mitigator::Mitigator;
use crate::navigator::{ElementHandle, Navigator, Page};
use crate::oracle::{self, Oracle, ITEM_MARKER};
use crate::selectors::catalog::PROBE_CATALOG;
use crate::selectors::classify::{self, ProbeOutcome, MIN_CONTAINER_TEXT};
use crate::selectors::{LearnOutcome, SelectorCandidate, SelectorId, SelectorStore, WILDCARD_DOMAIN};
use crate::storage::Persistence;
use crate::utils::error::{NavigationError, PageError, StageError};
use crate::utils::text::{clean_page_text, domain_of};

// Pages with less visible text than this are treated as failed loads.
const MIN_PAGE_CHARS: usize = 100;
// Containers read per match, and how many of those are sent on.
const MAX_CONTAINERS_READ: usize = 30;
const MAX_CONTAINERS_SENT: usize = 25;

/// Container text picked by a selector stage, waiting for the oracle.
struct Extracted {
    text: String,
    selector: SelectorCandidate,
    containers: usize,
}

/// Mutable state of one running session.
struct SessionContext {
    raw_url: String,
    url: Option<Url>,
    domain: String,
    page: Option<Box<dyn Page>>,
    page_text: String,
    extracted: Option<Extracted>,
    tried: HashSet<SelectorId>,
    challenge_unresolved: bool,
    strategy: Option<Strategy>,
    winning_selector: Option<SelectorId>,
    records: Vec<ProductRecord>,
    diagnostics: Diagnostics,
}

impl SessionContext {
    fn new(raw_url: &str) -> Self {
        Self {
            raw_url: raw_url.to_string(),
            url: None,
            domain: String::new(),
            page: None,
            page_text: String::new(),
            extracted: None,
            tried: HashSet::new(),
            challenge_unresolved: false,
            strategy: None,
            winning_selector: None,
            records: Vec::new(),
            diagnostics: Diagnostics {
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        }
    }

    fn page(&mut self) -> Result<&mut Box<dyn Page>, PageError> {
        self.page.as_mut().ok_or(PageError::Closed)
    }
}

/// Drives one URL through the escalating extraction states.
///
/// The extractor is shared: any number of `extract` calls may run at once.
/// They meet only in the rate gate and the backing store.
pub struct Extractor {
    navigator: Arc<dyn Navigator>,
    oracle: Arc<dyn Oracle>,
    backend: Arc<dyn Persistence>,
    selectors: SelectorStore,
    identity: IdentityEngine,
    mitigator: Mitigator,
    gate: RateGate,
}

impl Extractor {
    pub fn new(
        navigator: Arc<dyn Navigator>,
        oracle: Arc<dyn Oracle>,
        backend: Arc<dyn Persistence>,
        gate: RateGate,
    ) -> Self {
        Self {
            navigator,
            oracle,
            selectors: SelectorStore::new(backend.clone()),
            identity: IdentityEngine::new(backend.clone()),
            backend,
            mitigator: Mitigator::new(),
            gate,
        }
    }

    /// Runs a full session. Never fails: every problem ends up as a reason
    /// code and diagnostics on the returned result.
    pub async fn extract(&self, url: &str, options: &ExtractOptions) -> ExtractResult {
        let clock = Instant::now();
        let mut ctx = SessionContext::new(url);

        let mut state = match parse_target(url) {
            Ok((target, domain)) => {
                ctx.url = Some(target);
                ctx.domain = domain;
                State::RateLimitGate
            }
            Err(e) => {
                tracing::error!("Rejecting {}: {}", url, e);
                ctx.diagnostics.errors.push(e.to_string());
                State::TerminalFailure(ReasonCode::NavigationFailed)
            }
        };
        tracing::info!(domain = %ctx.domain, "Starting extraction of {}", url);

        let mut attempts = 0;
        while !state.is_terminal() {
            let event = if options.stop.is_stopped() {
                Event::Cancelled
            } else {
                tokio::select! {
                    biased;
                    _ = options.stop.stopped() => Event::Cancelled,
                    event = self.run_state(&mut ctx, state, options) => event,
                }
            };

            attempts += 1;
            let next = advance(state, event, attempts, options.max_attempts);
            tracing::info!(domain = %ctx.domain, "{} --{:?}--> {}", state, event, next);
            ctx.diagnostics.transitions.push(TransitionRecord {
                from: state,
                event,
                to: next,
            });
            state = next;
        }

        // The page is released here whatever the exit path was
        if let Some(mut page) = ctx.page.take() {
            if tokio::time::timeout(options.timeouts.page_query, page.close()).await.is_err() {
                tracing::warn!(domain = %ctx.domain, "Closing the page timed out; dropping it");
            }
        }

        ctx.diagnostics.attempts = attempts;
        self.finish(ctx, state, clock.elapsed()).await
    }

    async fn finish(&self, mut ctx: SessionContext, state: State, elapsed: Duration) -> ExtractResult {
        let (status, reason) = match state {
            State::TerminalSuccess => (SessionStatus::Success, None),
            State::TerminalFailure(reason) => (SessionStatus::Failure, Some(reason)),
            _ => (SessionStatus::Failure, Some(ReasonCode::AttemptsExhausted)),
        };

        let finished = Utc::now();
        ctx.diagnostics.finished_at = Some(finished);
        ctx.diagnostics.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        match reason {
            None => tracing::info!(
                domain = %ctx.domain,
                "Extracted {} products from {} via {:?} in {} ms",
                ctx.records.len(),
                ctx.raw_url,
                ctx.strategy,
                ctx.diagnostics.duration_ms
            ),
            Some(reason) => tracing::error!(
                domain = %ctx.domain,
                "Extraction of {} failed: {} after {} transitions",
                ctx.raw_url,
                reason,
                ctx.diagnostics.attempts
            ),
        }

        let session = ExtractionSession {
            url: ctx.raw_url.clone(),
            domain: ctx.domain.clone(),
            strategy_used: ctx.strategy,
            status,
            reason,
            products_found: ctx.records.len(),
            selector_id: ctx.winning_selector,
            started_at: ctx.diagnostics.started_at.unwrap_or(finished),
            finished_at: finished,
        };
        if let Err(e) = self.backend.record_session(&session).await {
            tracing::warn!(domain = %ctx.domain, "Could not record session: {}", e);
            ctx.diagnostics.errors.push(format!("session record: {}", e));
        }

        ExtractResult {
            url: ctx.raw_url,
            status,
            records: ctx.records,
            strategy_used: ctx.strategy,
            reason,
            diagnostics: ctx.diagnostics,
        }
    }

    /// Runs the handler for `state` and turns any stage error into the
    /// event that escalates past it.
    async fn run_state(&self, ctx: &mut SessionContext, state: State, options: &ExtractOptions) -> Event {
        let outcome = match state {
            State::RateLimitGate => self.open_gate(ctx, options).await,
            State::Navigate => self.navigate(ctx, options).await,
            State::AntiBot => self.handle_challenge(ctx, options).await,
            State::DomainSelectors => {
                let domain = ctx.domain.clone();
                self.try_stored(ctx, options, &domain).await
            }
            State::WildcardSelectors => self.try_stored(ctx, options, WILDCARD_DOMAIN).await,
            State::AutoLearn => self.auto_learn(ctx, options).await,
            State::OracleParse(origin) => self.parse(ctx, options, origin).await,
            // Terminal states absorb every event
            State::TerminalSuccess | State::TerminalFailure(_) => Ok(Event::RecordsParsed),
        };

        outcome.unwrap_or_else(|e| {
            tracing::warn!(domain = %ctx.domain, state = %state, "Stage failed: {}", e);
            ctx.diagnostics.errors.push(format!("{}: {}", state, e));
            escalation_for(state, ctx.challenge_unresolved)
        })
    }

    async fn open_gate(&self, ctx: &mut SessionContext, options: &ExtractOptions) -> Result<Event, StageError> {
        let domain = &ctx.domain;
        let waited = bounded(
            "rate gate",
            options.timeouts.gate,
            async { Ok::<_, StageError>(self.gate.acquire(domain, options.spacing()).await) },
        )
        .await?;
        ctx.diagnostics.gate_wait_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
        Ok(Event::GateOpened)
    }

    async fn navigate(&self, ctx: &mut SessionContext, options: &ExtractOptions) -> Result<Event, StageError> {
        let url = ctx
            .url
            .clone()
            .ok_or_else(|| NavigationError::InvalidUrl(ctx.raw_url.clone()))?;
        let nav_timeout = options.timeouts.navigation;

        let page = bounded("navigation", nav_timeout, self.navigator.navigate(&url, nav_timeout)).await?;
        // Owned by the session from here on, so it is closed even if reading fails
        let page = ctx.page.insert(page);
        let text = bounded("page text", options.timeouts.page_query, page.text()).await?;

        let chars = text.trim().chars().count();
        ctx.diagnostics.page_chars = chars;
        if chars < MIN_PAGE_CHARS {
            return Err(NavigationError::EmptyPage(chars).into());
        }

        let detection = self.mitigator.detect(&text);
        ctx.diagnostics.challenge_detected = detection.challenged;
        ctx.page_text = text;
        if detection.challenged {
            tracing::warn!(domain = %ctx.domain, "Challenge page suspected ({} strong, {} weak indicators)", detection.strong, detection.weak);
        }
        Ok(Event::PageLoaded {
            challenge: detection.challenged,
        })
    }

    async fn handle_challenge(&self, ctx: &mut SessionContext, options: &ExtractOptions) -> Result<Event, StageError> {
        ctx.diagnostics.protection = Some(self.mitigator.protection_report(&ctx.page_text));

        if self.mitigator.content_sufficient(&ctx.page_text) {
            tracing::info!(domain = %ctx.domain, "Challenge flagged but content is usable; continuing");
            ctx.diagnostics.false_positive = true;
            return Ok(Event::ChallengeCleared);
        }

        ctx.challenge_unresolved = true;
        let page = ctx.page()?;
        let cleared = self
            .mitigator
            .resolve(&mut **page, &options.challenge, options.timeouts.page_query)
            .await;
        ctx.diagnostics.challenge_resolved = Some(cleared);

        if !cleared {
            tracing::warn!(domain = %ctx.domain, "Challenge unresolved; continuing degraded");
            return Ok(Event::ChallengeUnresolved);
        }

        let page = ctx.page()?;
        let text = bounded("page text", options.timeouts.page_query, page.text()).await?;
        ctx.page_text = text;
        ctx.challenge_unresolved = false;
        Ok(Event::ChallengeCleared)
    }

    /// Tries stored candidates for `domain` in rank order. The first whose
    /// container query passes the stored-candidate probe wins. Wildcard rows
    /// mixed into a domain's list are left for the wildcard stage.
    async fn try_stored(
        &self,
        ctx: &mut SessionContext,
        options: &ExtractOptions,
        domain: &str,
    ) -> Result<Event, StageError> {
        let wildcard_stage = domain == WILDCARD_DOMAIN;
        let candidates: Vec<SelectorCandidate> = self
            .selectors
            .get_candidates(domain, options.min_quality)
            .await?
            .into_iter()
            .filter(|candidate| candidate.is_wildcard() == wildcard_stage)
            .collect();
        tracing::debug!(domain = %ctx.domain, "{} candidates from '{}'", candidates.len(), domain);

        for candidate in candidates {
            if !ctx.tried.insert(candidate.id) {
                continue;
            }
            ctx.diagnostics.candidates_tried += 1;

            let page = ctx.page()?;
            let elements = match bounded(
                "container query",
                options.timeouts.page_query,
                page.query_all(&candidate.expression),
            )
            .await
            {
                Ok(elements) => elements,
                Err(e) => {
                    tracing::debug!("Candidate {} '{}' failed: {}", candidate.id, candidate.expression, e);
                    continue;
                }
            };

            match classify::probe_stored(&elements) {
                ProbeOutcome::Matched { count, sample_quality } => {
                    let text = container_text(&elements);
                    if text.is_empty() {
                        continue;
                    }
                    tracing::info!(
                        domain = %ctx.domain,
                        "Candidate {} '{}' matched {} containers (sample quality {:.2})",
                        candidate.id,
                        candidate.expression,
                        count,
                        sample_quality
                    );
                    ctx.extracted = Some(Extracted {
                        text,
                        selector: candidate,
                        containers: count,
                    });
                    return Ok(Event::Matched);
                }
                ProbeOutcome::NoMatch => {
                    tracing::trace!("Candidate {} '{}' did not match", candidate.id, candidate.expression);
                }
            }
        }

        Ok(Event::NoMatch)
    }

    /// Probes the generic catalog and learns the first expression whose
    /// matches look like products.
    async fn auto_learn(&self, ctx: &mut SessionContext, options: &ExtractOptions) -> Result<Event, StageError> {
        let domain = ctx.domain.clone();

        for expression in PROBE_CATALOG {
            let page = ctx.page()?;
            let elements = match bounded("probe query", options.timeouts.page_query, page.query_all(expression)).await {
                Ok(elements) => elements,
                Err(e) => {
                    tracing::debug!("Probe '{}' failed: {}", expression, e);
                    continue;
                }
            };

            let outcome = self.selectors.learn(&domain, expression, &elements).await?;
            if let LearnOutcome::Learned(row) = &outcome {
                ctx.diagnostics.learned_selector = Some(row.id);
            }
            let Some(row) = outcome.candidate().cloned() else {
                continue;
            };
            // Already failed earlier in this session
            if !ctx.tried.insert(row.id) {
                continue;
            }

            let text = container_text(&elements);
            if text.is_empty() {
                continue;
            }
            ctx.extracted = Some(Extracted {
                text,
                selector: row,
                containers: elements.len(),
            });
            return Ok(Event::Matched);
        }

        Ok(Event::NoMatch)
    }

    async fn parse(
        &self,
        ctx: &mut SessionContext,
        options: &ExtractOptions,
        origin: Strategy,
    ) -> Result<Event, StageError> {
        ctx.strategy = Some(origin);

        let (text, selector) = match (origin, ctx.extracted.take()) {
            (Strategy::OracleOnly, _) => (clean_page_text(&ctx.page_text), None),
            (_, Some(extracted)) => {
                ctx.diagnostics.selector_id = Some(extracted.selector.id);
                ctx.diagnostics.selector_expression = Some(extracted.selector.expression.clone());
                ctx.diagnostics.containers_found = extracted.containers;
                (extracted.text, Some(extracted.selector))
            }
            (_, None) => {
                tracing::error!(domain = %ctx.domain, "No container text for {}", origin);
                return Ok(Event::OracleEmpty {
                    degraded: ctx.challenge_unresolved,
                });
            }
        };

        tracing::info!(domain = %ctx.domain, "Sending {} chars to the oracle ({})", text.chars().count(), origin);
        let run = oracle::parse_text(self.oracle.as_ref(), &text, options.timeouts.oracle).await;
        ctx.diagnostics.chunks += run.chunks;
        ctx.diagnostics.empty_chunks += run.empty_chunks;

        if run.records.is_empty() {
            if let Some(selector) = &selector {
                self.feedback(ctx, selector.id, false, 0).await;
            }
            tracing::warn!(domain = %ctx.domain, "Oracle found nothing via {}", origin);
            return Ok(Event::OracleEmpty {
                degraded: ctx.challenge_unresolved,
            });
        }

        let records = match self.identity.merge(&ctx.domain, run.records.clone()).await {
            Ok((records, report)) => {
                ctx.diagnostics.merge = Some(report);
                records
            }
            Err(e) => {
                tracing::warn!(domain = %ctx.domain, "Product merge failed, returning unmerged records: {}", e);
                ctx.diagnostics.errors.push(format!("merge: {}", e));
                collapse_session(run.records)
            }
        };

        if let Some(selector) = &selector {
            self.feedback(ctx, selector.id, true, records.len()).await;
            ctx.winning_selector = Some(selector.id);
        }
        ctx.records = records;
        Ok(Event::RecordsParsed)
    }

    /// Selector feedback is best-effort; a store failure never fails the session.
    async fn feedback(&self, ctx: &mut SessionContext, id: SelectorId, success: bool, products_found: usize) {
        if let Err(e) = self.selectors.record_outcome(id, success, products_found).await {
            tracing::warn!(domain = %ctx.domain, "Could not record outcome for selector {}: {}", id, e);
            ctx.diagnostics.errors.push(format!("selector feedback: {}", e));
        }
    }
}

fn parse_target(url: &str) -> Result<(Url, String), NavigationError> {
    let target = Url::parse(url).map_err(|e| NavigationError::InvalidUrl(format!("{}: {}", url, e)))?;
    let domain = domain_of(&target).ok_or_else(|| NavigationError::InvalidUrl(format!("{}: no host", url)))?;
    Ok((target, domain))
}

/// Event that moves a session past a stage that failed with an error.
fn escalation_for(state: State, degraded: bool) -> Event {
    match state {
        State::RateLimitGate | State::Navigate => Event::NavigationFailed,
        State::AntiBot => Event::ChallengeUnresolved,
        State::DomainSelectors | State::WildcardSelectors | State::AutoLearn => Event::NoMatch,
        State::OracleParse(_) => Event::OracleEmpty { degraded },
        State::TerminalSuccess | State::TerminalFailure(_) => Event::RecordsParsed,
    }
}

/// Wraps a fallible step in a timeout that surfaces as a typed error.
async fn bounded<T, E, F>(stage: &'static str, after: Duration, step: F) -> Result<T, StageError>
where
    F: Future<Output = Result<T, E>>,
    StageError: From<E>,
{
    match tokio::time::timeout(after, step).await {
        Ok(result) => result.map_err(StageError::from),
        Err(_) => Err(StageError::Timeout { stage, after }),
    }
}

/// Joins container texts, each behind an item marker, for the oracle.
fn container_text(elements: &[ElementHandle]) -> String {
    elements
        .iter()
        .take(MAX_CONTAINERS_READ)
        .map(|el| el.inner_text().trim())
        .filter(|text| text.chars().count() > MIN_CONTAINER_TEXT)
        .take(MAX_CONTAINERS_SENT)
        .map(|text| format!("{}\n{}", ITEM_MARKER, text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
