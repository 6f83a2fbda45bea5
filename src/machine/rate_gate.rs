// src/machine/rate_gate.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

type Slot = Arc<tokio::sync::Mutex<Option<Instant>>>;

#[derive(Debug, Default)]
struct Slots {
    by_domain: HashMap<String, Slot>,
    // Longest spacing ever requested; older stamps can no longer delay anyone
    longest: Duration,
}

/// Per-domain request spacing shared by every session of a process.
///
/// Sessions on the same domain queue on that domain's slot; other domains
/// are never blocked. Clones share the same map. Slots nobody is waiting on
/// are dropped once their stamp is older than the longest spacing in use, so
/// the map only holds recently visited domains.
#[derive(Debug, Clone, Default)]
pub struct RateGate {
    slots: Arc<Mutex<Slots>>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, domain: &str, spacing: Duration) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.longest = slots.longest.max(spacing);
        let longest = slots.longest;

        slots
            .by_domain
            .retain(|name, slot| name == domain || !expired(slot, longest));
        slots.by_domain.entry(domain.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn tracked_domains(&self) -> usize {
        self.slots.lock().unwrap().by_domain.len()
    }

    /// Waits until `spacing` has passed since the previous request to
    /// `domain`, then stamps the current time. Returns how long it waited.
    /// Dropping the future before it resolves leaves the stamp untouched.
    pub async fn acquire(&self, domain: &str, spacing: Duration) -> Duration {
        let slot = self.slot(domain, spacing);
        let mut last = slot.lock().await;

        let waited = match *last {
            Some(previous) => {
                let ready = previous + spacing;
                let now = Instant::now();
                if ready > now {
                    tracing::debug!("Rate gate for {}: waiting {:?}", domain, ready - now);
                    tokio::time::sleep_until(ready).await;
                    ready - now
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        };

        *last = Some(Instant::now());
        waited
    }
}

/// True when no session holds `slot` and its stamp is older than `span`.
fn expired(slot: &Slot, span: Duration) -> bool {
    if Arc::strong_count(slot) > 1 {
        return false;
    }
    match slot.try_lock() {
        Ok(last) => match *last {
            Some(stamp) => stamp.elapsed() >= span,
            None => true,
        },
        Err(_) => false,
    }
}
