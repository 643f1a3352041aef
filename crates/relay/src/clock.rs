//! Clock abstraction so protocol timing is testable
//!
//! The engine never reads the system clock directly; every timestamp flows
//! from a `Clock` capability object. Tests (and hosts that drive the tick
//! cadence themselves) use `ManualClock`.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall-clock time
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Externally advanced clock
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(SystemTime::now())
    }

    pub fn advance(&self, delta: Duration) {
        match self.current.lock() {
            Ok(mut current) => *current += delta,
            Err(poisoned) => *poisoned.into_inner() += delta,
        }
    }

    pub fn set(&self, time: SystemTime) {
        match self.current.lock() {
            Ok(mut current) => *current = time,
            Err(poisoned) => *poisoned.into_inner() = time,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Seconds since the Unix epoch, saturating at zero for pre-epoch times
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let start = UNIX_EPOCH + Duration::from_secs(100);
        let clock = ManualClock::new(start);

        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), start + Duration::from_secs(5));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_unix_seconds() {
        assert_eq!(unix_seconds(UNIX_EPOCH), 0);
        assert_eq!(
            unix_seconds(UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
            1_700_000_000
        );
    }
}
