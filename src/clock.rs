use chrono::{DateTime, Utc};

/// Injectable time source so review-date math is testable without waiting
/// on the wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock pinned to a fixed instant, advanced by hand.
#[cfg(test)]
pub struct FixedClock(pub std::sync::Mutex<DateTime<Utc>>);

#[cfg(test)]
impl FixedClock {
    pub fn at(t: DateTime<Utc>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(FixedClock(std::sync::Mutex::new(t)))
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.0.lock().unwrap() = t;
    }

    pub fn advance(&self, d: chrono::Duration) {
        let mut now = self.0.lock().unwrap();
        *now += d;
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}
