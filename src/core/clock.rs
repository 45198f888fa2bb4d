//! Clock authority. Every deadline decision in the engine reads `now()` from here and never
//! from a timestamp supplied by a client.

#[cfg(test)]
use std::sync::Mutex;

#[cfg(test)]
use time::Duration;
use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;

pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> PrimitiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> PrimitiveDateTime {
        primitive_now_utc()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ManualClock {
    now: Mutex<PrimitiveDateTime>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new(start: PrimitiveDateTime) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }

    pub(crate) fn set(&self, value: PrimitiveDateTime) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = value;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> PrimitiveDateTime {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
