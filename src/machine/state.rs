// src/machine/state.rs
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Where the text handed to the oracle came from. Doubles as the strategy
/// label reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    DomainSelectors,
    WildcardSelectors,
    AutoLearn,
    /// Whole cleaned page text, no container selector
    OracleOnly,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Strategy::DomainSelectors => "DOMAIN_SELECTORS",
            Strategy::WildcardSelectors => "WILDCARD_SELECTORS",
            Strategy::AutoLearn => "AUTO_LEARN",
            Strategy::OracleOnly => "ORACLE_ONLY",
        };
        f.write_str(label)
    }
}

/// Coarse failure reason returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    NavigationFailed,
    ChallengeUnresolved,
    NoProductsFound,
    AttemptsExhausted,
    Cancelled,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReasonCode::NavigationFailed => "navigation_failed",
            ReasonCode::ChallengeUnresolved => "challenge_unresolved",
            ReasonCode::NoProductsFound => "no_products_found",
            ReasonCode::AttemptsExhausted => "attempts_exhausted",
            ReasonCode::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    RateLimitGate,
    Navigate,
    AntiBot,
    DomainSelectors,
    WildcardSelectors,
    AutoLearn,
    OracleParse(Strategy),
    TerminalSuccess,
    TerminalFailure(ReasonCode),
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::TerminalSuccess | State::TerminalFailure(_))
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::RateLimitGate => f.write_str("RATE_LIMIT_GATE"),
            State::Navigate => f.write_str("NAVIGATE"),
            State::AntiBot => f.write_str("ANTI_BOT"),
            State::DomainSelectors => f.write_str("DOMAIN_SELECTORS"),
            State::WildcardSelectors => f.write_str("WILDCARD_SELECTORS"),
            State::AutoLearn => f.write_str("AUTO_LEARN"),
            State::OracleParse(origin) => write!(f, "ORACLE_PARSE({})", origin),
            State::TerminalSuccess => f.write_str("TERMINAL_SUCCESS"),
            State::TerminalFailure(reason) => write!(f, "TERMINAL_FAILURE({})", reason),
        }
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of running one state handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    GateOpened,
    PageLoaded { challenge: bool },
    NavigationFailed,
    ChallengeCleared,
    /// Dismissal failed; the session continues degraded
    ChallengeUnresolved,
    Matched,
    NoMatch,
    RecordsParsed,
    /// Oracle produced nothing usable. `degraded` is set when an unresolved
    /// challenge was left behind earlier in the session.
    OracleEmpty { degraded: bool },
    Cancelled,
}

/// The transition table. Escalation only moves forward, so every path
/// reaches a terminal state. Pairs the driver never produces are treated
/// as "nothing found".
pub fn transition(state: State, event: Event) -> State {
    use Event as E;
    use State as S;

    if state.is_terminal() {
        return state;
    }
    if event == E::Cancelled {
        return S::TerminalFailure(ReasonCode::Cancelled);
    }

    match (state, event) {
        (S::RateLimitGate, E::GateOpened) => S::Navigate,
        (S::RateLimitGate, E::NavigationFailed) => S::TerminalFailure(ReasonCode::NavigationFailed),

        (S::Navigate, E::PageLoaded { challenge: true }) => S::AntiBot,
        (S::Navigate, E::PageLoaded { challenge: false }) => S::DomainSelectors,
        (S::Navigate, E::NavigationFailed) => S::TerminalFailure(ReasonCode::NavigationFailed),

        // An unresolved challenge degrades the session but does not end it
        (S::AntiBot, E::ChallengeCleared) | (S::AntiBot, E::ChallengeUnresolved) => S::DomainSelectors,

        (S::DomainSelectors, E::Matched) => S::OracleParse(Strategy::DomainSelectors),
        (S::DomainSelectors, E::NoMatch) => S::WildcardSelectors,

        (S::WildcardSelectors, E::Matched) => S::OracleParse(Strategy::WildcardSelectors),
        (S::WildcardSelectors, E::NoMatch) => S::AutoLearn,

        (S::AutoLearn, E::Matched) => S::OracleParse(Strategy::AutoLearn),
        (S::AutoLearn, E::NoMatch) => S::OracleParse(Strategy::OracleOnly),

        (S::OracleParse(_), E::RecordsParsed) => S::TerminalSuccess,

        // Empty oracle output backtracks to the next untried strategy
        (S::OracleParse(Strategy::DomainSelectors), E::OracleEmpty { .. }) => S::WildcardSelectors,
        (S::OracleParse(Strategy::WildcardSelectors), E::OracleEmpty { .. }) => S::AutoLearn,
        (S::OracleParse(Strategy::AutoLearn), E::OracleEmpty { .. }) => S::OracleParse(Strategy::OracleOnly),
        (S::OracleParse(Strategy::OracleOnly), E::OracleEmpty { degraded: true }) => {
            S::TerminalFailure(ReasonCode::ChallengeUnresolved)
        }
        (S::OracleParse(Strategy::OracleOnly), E::OracleEmpty { degraded: false }) => {
            S::TerminalFailure(ReasonCode::NoProductsFound)
        }

        (state, event) => {
            tracing::error!("No transition from {} on {:?}", state, event);
            S::TerminalFailure(ReasonCode::NoProductsFound)
        }
    }
}

/// `transition` plus the attempt ceiling: once `attempts` transitions have
/// been taken, any non-terminal target becomes `AttemptsExhausted`.
pub fn advance(state: State, event: Event, attempts: usize, max_attempts: usize) -> State {
    let next = transition(state, event);
    if !next.is_terminal() && attempts >= max_attempts {
        return State::TerminalFailure(ReasonCode::AttemptsExhausted);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_EVENTS: &[Event] = &[
        Event::GateOpened,
        Event::PageLoaded { challenge: true },
        Event::PageLoaded { challenge: false },
        Event::NavigationFailed,
        Event::ChallengeCleared,
        Event::ChallengeUnresolved,
        Event::Matched,
        Event::NoMatch,
        Event::RecordsParsed,
        Event::OracleEmpty { degraded: false },
        Event::OracleEmpty { degraded: true },
    ];

    fn walk(events: &[Event]) -> State {
        events
            .iter()
            .fold(State::RateLimitGate, |state, event| transition(state, *event))
    }

    #[test]
    fn happy_path_through_domain_selectors() {
        let end = walk(&[
            Event::GateOpened,
            Event::PageLoaded { challenge: false },
            Event::Matched,
            Event::RecordsParsed,
        ]);
        assert_eq!(end, State::TerminalSuccess);
    }

    #[test]
    fn navigation_failure_is_terminal() {
        let end = walk(&[Event::GateOpened, Event::NavigationFailed]);
        assert_eq!(end, State::TerminalFailure(ReasonCode::NavigationFailed));
    }

    #[test]
    fn full_escalation_ends_without_products() {
        let mut state = State::RateLimitGate;
        let mut seen = Vec::new();
        for event in [
            Event::GateOpened,
            Event::PageLoaded { challenge: true },
            Event::ChallengeUnresolved,
            Event::Matched,
            Event::OracleEmpty { degraded: true },
            Event::NoMatch,
            Event::Matched,
            Event::OracleEmpty { degraded: true },
            Event::OracleEmpty { degraded: true },
        ] {
            state = transition(state, event);
            seen.push(state);
        }

        assert_eq!(
            seen,
            vec![
                State::Navigate,
                State::AntiBot,
                State::DomainSelectors,
                State::OracleParse(Strategy::DomainSelectors),
                State::WildcardSelectors,
                State::AutoLearn,
                State::OracleParse(Strategy::AutoLearn),
                State::OracleParse(Strategy::OracleOnly),
                State::TerminalFailure(ReasonCode::ChallengeUnresolved),
            ]
        );
    }

    #[test]
    fn cancellation_wins_from_any_live_state() {
        for state in [
            State::RateLimitGate,
            State::AntiBot,
            State::AutoLearn,
            State::OracleParse(Strategy::OracleOnly),
        ] {
            assert_eq!(
                transition(state, Event::Cancelled),
                State::TerminalFailure(ReasonCode::Cancelled)
            );
        }
        // Terminal states absorb everything
        assert_eq!(transition(State::TerminalSuccess, Event::Cancelled), State::TerminalSuccess);
    }

    #[test]
    fn ceiling_forces_exhaustion() {
        let next = advance(State::DomainSelectors, Event::NoMatch, 5, 5);
        assert_eq!(next, State::TerminalFailure(ReasonCode::AttemptsExhausted));

        // A terminal target is still reported as itself
        let next = advance(State::OracleParse(Strategy::AutoLearn), Event::RecordsParsed, 5, 5);
        assert_eq!(next, State::TerminalSuccess);
    }

    #[test]
    fn any_event_sequence_terminates_within_the_ceiling() {
        let max_attempts = 16;
        // Deterministic pseudo-random walks over the event alphabet
        for seed in 0..500u64 {
            let mut state = State::RateLimitGate;
            let mut rng = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let mut attempts = 0;
            while !state.is_terminal() {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let event = ALL_EVENTS[(rng >> 33) as usize % ALL_EVENTS.len()];
                attempts += 1;
                state = advance(state, event, attempts, max_attempts);
                assert!(attempts <= max_attempts, "seed {} ran past the ceiling", seed);
            }
        }
    }

    #[test]
    fn labels_serialize_as_display() {
        let json = serde_json::to_string(&State::OracleParse(Strategy::OracleOnly)).unwrap();
        assert_eq!(json, "\"ORACLE_PARSE(ORACLE_ONLY)\"");
        let json = serde_json::to_string(&ReasonCode::AttemptsExhausted).unwrap();
        assert_eq!(json, "\"attempts_exhausted\"");
        let json = serde_json::to_string(&Strategy::AutoLearn).unwrap();
        assert_eq!(json, "\"AUTO_LEARN\"");
    }
}
