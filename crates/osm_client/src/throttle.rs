use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::retry::{CancelToken, Cancelled, Sleeper};

/// Minimum spacing between requests to one service.
///
/// Shared by every caller of that service, so adding workers never raises
/// the aggregate request rate.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until a request may go out, then claim the slot.
    pub fn acquire(&self, sleeper: &dyn Sleeper, cancel: &CancelToken) -> Result<(), Cancelled> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleeper.sleep(self.min_interval - elapsed, cancel)?;
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleeper;

    #[test]
    fn first_request_goes_straight_out() {
        let t = Throttle::new(Duration::from_secs(1));
        let sleeper = RecordingSleeper::default();
        t.acquire(&sleeper, &CancelToken::new()).unwrap();
        assert!(sleeper.waits().is_empty());
    }

    #[test]
    fn back_to_back_requests_are_spaced() {
        let t = Throttle::new(Duration::from_secs(1));
        let sleeper = RecordingSleeper::default();
        let cancel = CancelToken::new();
        t.acquire(&sleeper, &cancel).unwrap();
        t.acquire(&sleeper, &cancel).unwrap();

        let waits = sleeper.waits();
        assert_eq!(waits.len(), 1);
        assert!(waits[0] > Duration::from_millis(900) && waits[0] <= Duration::from_secs(1));
    }

    #[test]
    fn zero_interval_never_waits() {
        let t = Throttle::new(Duration::ZERO);
        let sleeper = RecordingSleeper::default();
        let cancel = CancelToken::new();
        for _ in 0..3 {
            t.acquire(&sleeper, &cancel).unwrap();
        }
        assert!(sleeper.waits().is_empty());
    }

    #[test]
    fn cancelled_wait_does_not_claim_slot() {
        let t = Throttle::new(Duration::from_secs(1));
        let sleeper = RecordingSleeper::default();
        let cancel = CancelToken::new();
        t.acquire(&sleeper, &cancel).unwrap();
        cancel.cancel();
        assert_eq!(t.acquire(&sleeper, &cancel), Err(Cancelled));
    }
}
