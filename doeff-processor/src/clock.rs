use std::time::{SystemTime, UNIX_EPOCH};

use crate::env::RESERVED_CLOCK_KEY;
use crate::errors::ExecutionError;
use crate::store::Store;

/// Backs `Delay`/`WaitUntil`/`GetTime` (spec.md §4.6, §6). Time is always expressed as
/// milliseconds since an implementation-defined epoch.
///
/// Grounded on the teacher's split between a real `SystemClock`-like notion used by the
/// default runner and a deterministic stand-in used by tests (`processor`'s reliance on
/// `miden-utils-sync`'s clock-free design doesn't map directly here, since this runtime has a
/// genuine time-effect surface the VM itself exposes).
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Real wall-clock time.
#[derive(Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A deterministic clock for tests: time only moves when `advance`/`set` is called explicitly,
/// backed by the store's reserved clock slot so it is visible across every task of a run
/// (spec.md §4.6 "simulation mode").
#[derive(Clone)]
pub struct SimClock {
    store: Store,
}

impl SimClock {
    pub fn new(store: Store) -> Self {
        if store.get_raw(RESERVED_CLOCK_KEY).is_none() {
            store.put(RESERVED_CLOCK_KEY, 0u64);
        }
        SimClock { store }
    }

    pub fn set(&self, millis: u64) {
        self.store.put(RESERVED_CLOCK_KEY, millis);
    }

    pub fn advance(&self, delta_millis: u64) -> Result<u64, ExecutionError> {
        self.store.modify::<u64, ExecutionError>(RESERVED_CLOCK_KEY, |cur| {
            Ok(cur.copied().unwrap_or(0) + delta_millis)
        })
    }
}

impl Clock for SimClock {
    fn now_millis(&self) -> u64 {
        self.store.get::<u64>(RESERVED_CLOCK_KEY).unwrap_or(0)
    }
}
