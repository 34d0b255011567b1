//! `Clock` is an external collaborator (spec.md §6): something supplies
//! `nowMillis()` for `modificationTime`, `deletionTimestamp`,
//! `commitTimestamp`, and checkpoint retention decisions. Production
//! code uses [`SystemClock`]; tests inject a [`FixedClock`] so retention
//! and conflict-timing assertions are deterministic.

use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Always reports the same instant.
#[derive(Debug)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

/// Advances by a fixed step every time it's read, for tests that need
/// successive actions to carry strictly increasing timestamps without
/// depending on wall-clock time.
#[derive(Debug)]
pub struct TickingClock {
    next: AtomicI64,
    step_millis: i64,
}

impl TickingClock {
    pub fn starting_at(start_millis: i64, step_millis: i64) -> Self {
        TickingClock {
            next: AtomicI64::new(start_millis),
            step_millis,
        }
    }
}

impl Clock for TickingClock {
    fn now_millis(&self) -> i64 {
        self.next.fetch_add(self.step_millis, Ordering::SeqCst)
    }
}
