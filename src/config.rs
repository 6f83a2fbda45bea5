// src/config.rs
use std::time::Duration;

use crate::machine::StopSignal;

// --- Defaults ---
// Minimum spacing between two requests to the same domain.
pub const DEFAULT_MIN_SPACING_SECS: u64 = 10;
// Upper bound on state transitions in one session.
pub const DEFAULT_MAX_ATTEMPTS: usize = 16;
// Selector candidates below this quality are not offered.
pub const DEFAULT_MIN_QUALITY: u32 = 100;

pub const ENV_MIN_SPACING: &str = "SHELF_SCOUT_MIN_SPACING_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "SHELF_SCOUT_MAX_ATTEMPTS";
pub const ENV_ORACLE_URL: &str = "SHELF_SCOUT_ORACLE_URL";
pub const ENV_ORACLE_KEY: &str = "SHELF_SCOUT_ORACLE_KEY";

/// Timeouts applied to each blocking step of a session.
#[derive(Debug, Clone)]
pub struct StageTimeouts {
    /// Waiting for the per-domain rate gate
    pub gate: Duration,
    pub navigation: Duration,
    /// Any single page call (text, query, click)
    pub page_query: Duration,
    /// One oracle call (per chunk)
    pub oracle: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            gate: Duration::from_secs(60),
            navigation: Duration::from_secs(60),
            page_query: Duration::from_secs(15),
            oracle: Duration::from_secs(90),
        }
    }
}

/// Fixed waits used by the challenge dismissal pass.
#[derive(Debug, Clone)]
pub struct ChallengeTiming {
    pub initial_wait: Duration,
    pub recheck_delay: Duration,
}

impl Default for ChallengeTiming {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(5),
            recheck_delay: Duration::from_secs(3),
        }
    }
}

impl ChallengeTiming {
    /// No waiting at all; used by tests and callers that pre-warm pages.
    pub fn immediate() -> Self {
        Self {
            initial_wait: Duration::ZERO,
            recheck_delay: Duration::ZERO,
        }
    }
}

/// Per-invocation options for `Extractor::extract`.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub timeouts: StageTimeouts,
    pub challenge: ChallengeTiming,
    /// Overrides the default per-domain spacing for this session.
    pub min_spacing: Option<Duration>,
    pub max_attempts: usize,
    pub min_quality: u32,
    pub stop: StopSignal,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            timeouts: StageTimeouts::default(),
            challenge: ChallengeTiming::default(),
            min_spacing: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_quality: DEFAULT_MIN_QUALITY,
            stop: StopSignal::new(),
        }
    }
}

impl ExtractOptions {
    /// Defaults adjusted by environment variables, read once at startup.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Some(secs) = read_env_number::<u64>(ENV_MIN_SPACING) {
            tracing::debug!("Using {}={} from environment", ENV_MIN_SPACING, secs);
            options.min_spacing = Some(Duration::from_secs(secs));
        }
        if let Some(attempts) = read_env_number::<usize>(ENV_MAX_ATTEMPTS) {
            tracing::debug!("Using {}={} from environment", ENV_MAX_ATTEMPTS, attempts);
            options.max_attempts = attempts;
        }

        options
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_min_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing = Some(spacing);
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_challenge_timing(mut self, timing: ChallengeTiming) -> Self {
        self.challenge = timing;
        self
    }

    /// Spacing in effect for this session.
    pub fn spacing(&self) -> Duration {
        self.min_spacing
            .unwrap_or(Duration::from_secs(DEFAULT_MIN_SPACING_SECS))
    }
}

fn read_env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring {}='{}': not a valid number", key, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spacing_falls_back_to_default() {
        let options = ExtractOptions::default();
        assert_eq!(options.spacing(), Duration::from_secs(DEFAULT_MIN_SPACING_SECS));

        let options = options.with_min_spacing(Duration::from_millis(250));
        assert_eq!(options.spacing(), Duration::from_millis(250));
    }

    #[test]
    fn builder_overrides_attempt_ceiling() {
        let options = ExtractOptions::default().with_max_attempts(3);
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.min_quality, DEFAULT_MIN_QUALITY);
    }
}
