//! Wall clock abstraction so throttle windows and cache ages can be tested
//! without sleeping.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
  fn now(&self) -> SystemTime;

  /// Seconds since the Unix epoch, the unit persisted in request-time records.
  fn epoch_secs(&self) -> f64 {
    self
      .now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs_f64())
      .unwrap_or(0.0)
  }
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> SystemTime {
    SystemTime::now()
  }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<SystemTime>,
}

impl ManualClock {
  pub fn new(start: SystemTime) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  /// Start at the current system time.
  pub fn starting_now() -> Self {
    Self::new(SystemTime::now())
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> SystemTime {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}
