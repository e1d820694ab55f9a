//! Time abstraction so training windows and cache timestamps are testable.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, NaiveDate, Utc};

// ==================== Clock Trait ====================

/// Source of "now" for the training window and cache bookkeeping.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    /// Calendar date the training window ends on.
    fn today(&self) -> NaiveDate {
        self.now_utc().date_naive()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests.
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(time)),
        }
    }

    pub fn set_time(&self, time: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += duration;
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mock_clock_advance_moves_today() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 3, 31, 23, 0, 0).unwrap());
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());

        clock.advance(Duration::hours(2));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
    }

    #[test]
    fn test_mock_clock_set_time() {
        let clock = MockClock::new(Utc::now());
        let target = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        clock.set_time(target);
        assert_eq!(clock.now_utc(), target);
    }

    #[test]
    fn test_system_clock_is_current() {
        let before = Utc::now();
        let now = SystemClock.now_utc();
        assert!(now >= before);
    }
}
