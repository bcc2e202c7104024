use chrono::{DateTime, Utc};

/// Time source for everything that makes validity or window decisions.
///
/// Production code uses [`SystemClock`]; tests inject a manual clock so
/// approval expiry and rate-limit windows are deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
