//! Retry state machine, cancellation and injectable waiting.
//!
//! The decision of what to do after a failed attempt is a pure function of
//! the failure class and the attempt index ([`RetryPolicy::on_failure`]).
//! [`Retrier`] drives it against a real request, sleeping through a
//! [`Sleeper`] so tests can record waits instead of serving them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gorodindex_config::RetrySettings;

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// Why one request attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError(u16),
    /// No response within the client timeout.
    Timeout,
    /// Any other non-success status.
    Rejected(u16),
    /// Connection failure, unreadable body, malformed JSON.
    Unexpected(String),
}

impl FailureClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            500..=599 => Self::ServerError(status),
            _ => Self::Rejected(status),
        }
    }

    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Unexpected(err.to_string())
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "HTTP 429 rate limited"),
            Self::ServerError(s) => write!(f, "HTTP {} server error", s),
            Self::Timeout => write!(f, "timed out"),
            Self::Rejected(s) => write!(f, "HTTP {} rejected", s),
            Self::Unexpected(msg) => write!(f, "unexpected failure: {}", msg),
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Where a retried request stands. Attempt indices are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    BackingOff { attempt: u32, wait: Duration },
    Exhausted { attempts: u32 },
    Succeeded { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_base: Duration,
    pub server_error_base: Duration,
    pub step: Duration,
    pub timeout_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts,
            rate_limit_base: Duration::from_secs(s.rate_limit_base_secs),
            server_error_base: Duration::from_secs(s.server_error_base_secs),
            step: Duration::from_secs(s.step_secs),
            timeout_wait: Duration::from_secs(s.timeout_wait_secs),
        }
    }

    /// Next state after attempt `attempt` failed with `class`.
    ///
    /// Rejections and unexpected failures end the loop at once. The final
    /// attempt never backs off.
    pub fn on_failure(&self, class: &FailureClass, attempt: u32) -> RetryState {
        let exhausted = RetryState::Exhausted {
            attempts: attempt + 1,
        };
        let wait = match class {
            FailureClass::RateLimited => self.rate_limit_base + self.step * attempt,
            FailureClass::ServerError(_) => self.server_error_base + self.step * attempt,
            FailureClass::Timeout => self.timeout_wait,
            FailureClass::Rejected(_) | FailureClass::Unexpected(_) => return exhausted,
        };
        if attempt + 1 >= self.max_attempts {
            return exhausted;
        }
        RetryState::BackingOff { attempt, wait }
    }

    /// State after a wait completes.
    pub fn after_wait(&self, state: RetryState) -> RetryState {
        match state {
            RetryState::BackingOff { attempt, .. } => RetryState::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// The batch was cancelled or ran past its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Shared cancellation flag with an optional deadline. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires once `timeout` has elapsed. A timeout too large to
    /// represent means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

pub trait Sleeper: Send + Sync {
    /// Wait for `duration`, returning early with `Cancelled` if `cancel` fires.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), Cancelled>;
}

/// Real waiting in short slices so cancellation is noticed within one slice.
#[derive(Debug, Clone, Copy)]
pub struct ThreadSleeper {
    pub slice: Duration,
}

impl Default for ThreadSleeper {
    fn default() -> Self {
        Self {
            slice: Duration::from_millis(200),
        }
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), Cancelled> {
        let until = Instant::now() + duration;
        loop {
            cancel.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            thread::sleep(self.slice.min(until - now));
        }
    }
}

/// Records requested waits without sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn wait_secs(&self) -> Vec<u64> {
        self.waits().iter().map(Duration::as_secs).collect()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), Cancelled> {
        cancel.check()?;
        self.waits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Gave up; `last` is the failure of the final attempt.
    Exhausted { attempts: u32, last: FailureClass },
    Cancelled,
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempt(s): {}", attempts, last)
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for RetryError {}

impl From<Cancelled> for RetryError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

pub struct Retrier<'a> {
    pub policy: &'a RetryPolicy,
    pub sleeper: &'a dyn Sleeper,
    pub cancel: &'a CancelToken,
}

impl Retrier<'_> {
    /// Run `attempt` until it succeeds or the policy gives up.
    /// `what` names the request in log lines.
    pub fn run<T>(
        &self,
        what: &str,
        mut attempt: impl FnMut(u32) -> Result<T, FailureClass>,
    ) -> Result<T, RetryError> {
        let mut state = RetryState::Attempting { attempt: 0 };
        loop {
            match state {
                RetryState::Attempting { attempt: n } => {
                    self.cancel.check()?;
                    match attempt(n) {
                        Ok(value) => {
                            log::trace!("{what}: {:?}", RetryState::Succeeded { attempts: n + 1 });
                            return Ok(value);
                        }
                        Err(class) => {
                            state = self.policy.on_failure(&class, n);
                            match state {
                                RetryState::BackingOff { wait, .. } => log::warn!(
                                    "{what}: {class}, retry {}/{} in {}s",
                                    n + 2,
                                    self.policy.max_attempts,
                                    wait.as_secs()
                                ),
                                RetryState::Exhausted { attempts } => {
                                    return Err(RetryError::Exhausted {
                                        attempts,
                                        last: class,
                                    })
                                }
                                _ => {}
                            }
                        }
                    }
                }
                RetryState::BackingOff { wait, .. } => {
                    self.sleeper.sleep(wait, self.cancel)?;
                    state = self.policy.after_wait(state);
                }
                RetryState::Exhausted { .. } | RetryState::Succeeded { .. } => {
                    unreachable!("terminal states return from the loop")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn rate_limit_backoff_grows_by_step() {
        let p = RetryPolicy::default();
        let waits: Vec<RetryState> = (0..5).map(|i| p.on_failure(&FailureClass::RateLimited, i)).collect();
        assert_eq!(
            waits,
            vec![
                RetryState::BackingOff { attempt: 0, wait: secs(10) },
                RetryState::BackingOff { attempt: 1, wait: secs(15) },
                RetryState::BackingOff { attempt: 2, wait: secs(20) },
                RetryState::BackingOff { attempt: 3, wait: secs(25) },
                RetryState::Exhausted { attempts: 5 },
            ]
        );
    }

    #[test]
    fn server_error_and_timeout_waits() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.on_failure(&FailureClass::ServerError(503), 2),
            RetryState::BackingOff { attempt: 2, wait: secs(25) }
        );
        assert_eq!(
            p.on_failure(&FailureClass::Timeout, 3),
            RetryState::BackingOff { attempt: 3, wait: secs(20) }
        );
    }

    #[test]
    fn rejection_aborts_immediately() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.on_failure(&FailureClass::Rejected(404), 0),
            RetryState::Exhausted { attempts: 1 }
        );
        assert_eq!(
            p.on_failure(&FailureClass::Unexpected("bad json".into()), 2),
            RetryState::Exhausted { attempts: 3 }
        );
    }

    #[test]
    fn wait_leads_to_next_attempt() {
        let p = RetryPolicy::default();
        let s = p.after_wait(RetryState::BackingOff { attempt: 1, wait: secs(15) });
        assert_eq!(s, RetryState::Attempting { attempt: 2 });
    }

    #[test]
    fn status_classification() {
        assert_eq!(FailureClass::from_status(429), FailureClass::RateLimited);
        assert_eq!(FailureClass::from_status(500), FailureClass::ServerError(500));
        assert_eq!(FailureClass::from_status(504), FailureClass::ServerError(504));
        assert_eq!(FailureClass::from_status(400), FailureClass::Rejected(400));
        assert_eq!(FailureClass::from_status(302), FailureClass::Rejected(302));
    }

    #[test]
    fn driver_retries_then_succeeds() {
        let sleeper = RecordingSleeper::default();
        let cancel = CancelToken::new();
        let policy = RetryPolicy::default();
        let r = Retrier { policy: &policy, sleeper: &sleeper, cancel: &cancel };

        let got = r.run("test", |n| match n {
            0 => Err(FailureClass::RateLimited),
            1 => Err(FailureClass::Timeout),
            _ => Ok(7),
        });
        assert_eq!(got, Ok(7));
        assert_eq!(sleeper.wait_secs(), vec![10, 20]);
    }

    #[test]
    fn driver_exhausts_after_cap() {
        let sleeper = RecordingSleeper::default();
        let cancel = CancelToken::new();
        let policy = RetryPolicy::default();
        let r = Retrier { policy: &policy, sleeper: &sleeper, cancel: &cancel };

        let mut calls = 0;
        let got: Result<(), _> = r.run("test", |_| {
            calls += 1;
            Err(FailureClass::ServerError(502))
        });
        assert_eq!(calls, 5);
        assert_eq!(
            got,
            Err(RetryError::Exhausted { attempts: 5, last: FailureClass::ServerError(502) })
        );
        assert_eq!(sleeper.wait_secs(), vec![15, 20, 25, 30]);
    }

    #[test]
    fn driver_stops_when_cancelled() {
        let sleeper = RecordingSleeper::default();
        let cancel = CancelToken::new();
        let policy = RetryPolicy::default();
        let r = Retrier { policy: &policy, sleeper: &sleeper, cancel: &cancel };

        let mut calls = 0;
        let got: Result<(), _> = r.run("test", |_| {
            calls += 1;
            cancel.cancel();
            Err(FailureClass::RateLimited)
        });
        assert_eq!(got, Err(RetryError::Cancelled));
        assert_eq!(calls, 1);
        assert!(sleeper.waits().is_empty());
    }

    #[test]
    fn expired_deadline_is_cancelled() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert_eq!(token.check(), Err(Cancelled));
        assert!(CancelToken::new().check().is_ok());
    }

    #[test]
    fn huge_deadline_means_none() {
        let token = CancelToken::with_timeout(Duration::from_secs(u64::MAX));
        assert!(token.check().is_ok());
        token.cancel();
        assert_eq!(token.check(), Err(Cancelled));
    }

    #[test]
    fn thread_sleeper_wakes_on_cancel() {
        let cancel = CancelToken::new();
        let other = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            other.cancel();
        });
        let sleeper = ThreadSleeper { slice: Duration::from_millis(5) };
        let started = Instant::now();
        assert_eq!(sleeper.sleep(secs(30), &cancel), Err(Cancelled));
        assert!(started.elapsed() < secs(5));
        handle.join().unwrap();
    }
}
