// Time Provider Port (for testability)

use chrono::{DateTime, TimeZone, Utc};

/// Time provider interface (allows pinning "now" in tests)
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;

    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_millis())
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Frozen clock
pub struct FixedTimeProvider(pub i64);

impl TimeProvider for FixedTimeProvider {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_time_provider() {
        let clock = FixedTimeProvider(1_738_400_400_000);
        assert_eq!(clock.now().timestamp(), 1_738_400_400);
    }
}
