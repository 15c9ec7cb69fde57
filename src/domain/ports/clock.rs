//! Time source seam: every service that compares `now` against a stored
//! timestamp takes a `dyn Clock` instead of calling `Utc::now()` directly,
//! so TTL/timeout/cooldown math is deterministic under test.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock: wall time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock with a settable instant, so escalation-ladder and TTL tests
/// don't race real time.
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: std::sync::Arc<std::sync::RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    #[must_use]
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant: std::sync::Arc::new(std::sync::RwLock::new(instant)) }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.instant.write().unwrap();
        *guard += duration;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.read().unwrap()
    }
}
