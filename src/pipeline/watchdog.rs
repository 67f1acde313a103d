//! Watchdog bounding blocking network calls.
//!
//! The session brackets every potentially-blocking write with
//! [`WatchdogTimer::set_begin_time`] / [`WatchdogTimer::reset_begin_time`].
//! While the call is blocked the media library keeps invoking the interrupt
//! hook, which lands in [`WatchdogTimer::poll`]. Once the threshold is crossed
//! the poll latches the timeout flag and asks the library to abort.
//!
//! The hook only carries an integer identity. A process-wide registry maps it
//! to a weak reference, so a hook that outlives its watchdog reports an error
//! instead of touching freed memory.

use log::{debug, error, warn};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::media::InterruptHook;

/// Time a single network call may block before it is interrupted.
pub(crate) const WATCHDOG_THRESHOLD_MS: u64 = 50;

const NO_BEGIN: i64 = -1;

static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

static REGISTRY: Lazy<Mutex<HashMap<usize, Weak<WatchdogTimer>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Answer given to the media library on each poll.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Continue = 0,
    Interrupt = 1,
    /// Internal failure; any non-zero answer aborts the call.
    Error = 2,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum WatchdogError {
    #[error("watchdog {0:#x} is already registered")]
    AlreadyRegistered(usize),

    #[error("watchdog registry lock is poisoned")]
    Poisoned,
}

/// Monotonic microseconds since the first call in this process.
pub fn now_micros() -> i64 {
    i64::try_from(CLOCK_ORIGIN.elapsed().as_micros()).unwrap_or(i64::MAX)
}

/// Elapsed microseconds between two readings of [`now_micros`].
///
/// `None` when either reading is negative or `end` precedes `begin`.
pub fn diff_micros(begin: i64, end: i64) -> Option<i64> {
    if begin < 0 || end < 0 || end < begin {
        return None;
    }
    Some(end - begin)
}

#[derive(Debug)]
pub struct WatchdogTimer {
    threshold_micros: i64,
    begin: AtomicI64,
    timeout_reached: AtomicBool,
}

impl WatchdogTimer {
    pub fn new(threshold: Duration) -> Arc<Self> {
        Arc::new(Self {
            threshold_micros: i64::try_from(threshold.as_micros()).unwrap_or(i64::MAX),
            begin: AtomicI64::new(NO_BEGIN),
            timeout_reached: AtomicBool::new(false),
        })
    }

    /// Marks the start of a blocking call and clears the timeout flag.
    pub fn set_begin_time(&self) {
        self.timeout_reached.store(false, Ordering::SeqCst);
        self.begin.store(now_micros(), Ordering::SeqCst);
    }

    /// Marks the end of a blocking call, whatever its outcome.
    pub fn reset_begin_time(&self) {
        self.begin.store(NO_BEGIN, Ordering::SeqCst);
    }

    /// Whether the last bracketed call was interrupted by the watchdog.
    pub fn is_timeout_reached(&self) -> bool {
        self.timeout_reached.load(Ordering::SeqCst)
    }

    /// Decides whether the blocked call should be aborted.
    ///
    /// Runs on the blocked thread; never blocks and never panics.
    pub fn poll(&self) -> PollOutcome {
        let begin = self.begin.load(Ordering::SeqCst);
        if begin == NO_BEGIN {
            return PollOutcome::Continue;
        }
        if self.timeout_reached.load(Ordering::SeqCst) {
            return PollOutcome::Interrupt;
        }

        let Some(elapsed) = diff_micros(begin, now_micros()) else {
            error!("Watchdog: invalid elapsed time since {}us", begin);
            return PollOutcome::Error;
        };

        if elapsed >= self.threshold_micros {
            self.timeout_reached.store(true, Ordering::SeqCst);
            warn!(
                "Watchdog: timeout of {}us reached after {}us, interrupting",
                self.threshold_micros, elapsed
            );
            PollOutcome::Interrupt
        } else {
            PollOutcome::Continue
        }
    }

    /// Registers this instance so the interrupt hook can reach it.
    ///
    /// The entry is removed when the returned [`Registration`] is dropped.
    pub fn register(self: &Arc<Self>) -> Result<Registration, WatchdogError> {
        let id = Arc::as_ptr(self) as usize;
        let mut registry = REGISTRY.lock().map_err(|_| WatchdogError::Poisoned)?;

        if let Some(existing) = registry.get(&id) {
            if existing.upgrade().is_some() {
                return Err(WatchdogError::AlreadyRegistered(id));
            }
            debug!("Watchdog: replacing stale registration {:#x}", id);
        }

        let weak = Arc::downgrade(self);
        registry.insert(id, weak.clone());
        debug!("Watchdog: registered {:#x}", id);
        Ok(Registration { id, watchdog: weak })
    }
}

/// Live entry in the registry; deregisters on drop.
#[derive(Debug)]
pub struct Registration {
    id: usize,
    watchdog: Weak<WatchdogTimer>,
}

impl Registration {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Interrupt hook resolving to the registered watchdog.
    pub fn hook(&self) -> InterruptHook {
        InterruptHook {
            callback: interrupt_callback,
            opaque: self.id as *mut c_void,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        match REGISTRY.lock() {
            Ok(mut registry) => {
                let ours = registry
                    .get(&self.id)
                    .is_some_and(|entry| entry.ptr_eq(&self.watchdog));
                if ours {
                    registry.remove(&self.id);
                    debug!("Watchdog: deregistered {:#x}", self.id);
                }
            }
            Err(_) => error!("Watchdog: registry poisoned, {:#x} not deregistered", self.id),
        }
    }
}

/// Resolves an identity through the registry and polls the watchdog behind it.
///
/// Logs nothing on the regular path; only the latching poll warns.
pub fn poll_identity(id: usize) -> PollOutcome {
    let watchdog = match REGISTRY.lock() {
        Ok(registry) => registry.get(&id).and_then(Weak::upgrade),
        Err(_) => {
            error!("Watchdog: registry poisoned while polling {:#x}", id);
            return PollOutcome::Error;
        }
    };

    match watchdog {
        Some(watchdog) => watchdog.poll(),
        None => {
            error!("Watchdog: {:#x} is not registered or no longer alive", id);
            PollOutcome::Error
        }
    }
}

extern "C" fn interrupt_callback(opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        error!("Watchdog: interrupt hook called without identity");
        return PollOutcome::Error as c_int;
    }
    poll_identity(opaque as usize) as c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_poll_without_begin_continues() {
        let watchdog = WatchdogTimer::new(Duration::from_millis(WATCHDOG_THRESHOLD_MS));
        assert_eq!(watchdog.poll(), PollOutcome::Continue);
        assert!(!watchdog.is_timeout_reached());
    }

    #[test]
    fn test_poll_before_threshold_continues() {
        let watchdog = WatchdogTimer::new(Duration::from_secs(10));
        watchdog.set_begin_time();
        assert_eq!(watchdog.poll(), PollOutcome::Continue);
        assert!(!watchdog.is_timeout_reached());
    }

    #[test]
    fn test_timeout_latches_until_next_begin() {
        let watchdog = WatchdogTimer::new(Duration::from_millis(5));
        watchdog.set_begin_time();
        sleep(Duration::from_millis(15));

        assert_eq!(watchdog.poll(), PollOutcome::Interrupt);
        assert!(watchdog.is_timeout_reached());
        assert_eq!(watchdog.poll(), PollOutcome::Interrupt);
        assert_eq!(watchdog.poll(), PollOutcome::Interrupt);

        // the flag survives the end of the bracket for classification
        watchdog.reset_begin_time();
        assert!(watchdog.is_timeout_reached());

        watchdog.set_begin_time();
        assert!(!watchdog.is_timeout_reached());
        assert_eq!(watchdog.poll(), PollOutcome::Continue);
    }

    #[test]
    fn test_reset_then_poll_continues() {
        let watchdog = WatchdogTimer::new(Duration::from_millis(1));
        watchdog.set_begin_time();
        sleep(Duration::from_millis(5));
        watchdog.reset_begin_time();
        assert_eq!(watchdog.poll(), PollOutcome::Continue);
    }

    #[test]
    fn test_diff_micros() {
        assert_eq!(diff_micros(10, 25), Some(15));
        assert_eq!(diff_micros(7, 7), Some(0));
        assert_eq!(diff_micros(-1, 5), None);
        assert_eq!(diff_micros(5, -1), None);
        assert_eq!(diff_micros(20, 10), None);
    }

    #[test]
    fn test_now_micros_is_monotonic() {
        let a = now_micros();
        let b = now_micros();
        assert!(a >= 0);
        assert!(diff_micros(a, b).is_some());
    }

    #[test]
    fn test_double_registration_is_rejected() {
        let watchdog = WatchdogTimer::new(Duration::from_millis(WATCHDOG_THRESHOLD_MS));
        let registration = watchdog.register().unwrap();
        assert_eq!(
            watchdog.register().unwrap_err(),
            WatchdogError::AlreadyRegistered(registration.id())
        );

        drop(registration);
        let again = watchdog.register();
        assert!(again.is_ok());
    }

    #[test]
    fn test_hook_reaches_registered_watchdog() {
        let watchdog = WatchdogTimer::new(Duration::from_millis(5));
        let registration = watchdog.register().unwrap();
        let hook = registration.hook();

        assert_eq!(hook.poll(), PollOutcome::Continue as c_int);
        watchdog.set_begin_time();
        sleep(Duration::from_millis(15));
        assert_eq!(hook.poll(), PollOutcome::Interrupt as c_int);
        assert!(watchdog.is_timeout_reached());
    }

    #[test]
    fn test_latched_hook_keeps_interrupting() {
        let watchdog = WatchdogTimer::new(Duration::from_millis(1));
        let registration = watchdog.register().unwrap();
        let hook = registration.hook();

        watchdog.set_begin_time();
        sleep(Duration::from_millis(5));
        for _ in 0..1000 {
            assert_eq!(hook.poll(), PollOutcome::Interrupt as c_int);
        }
        assert!(watchdog.is_timeout_reached());

        watchdog.reset_begin_time();
        assert_eq!(hook.poll(), PollOutcome::Continue as c_int);
    }

    #[test]
    fn test_hook_reports_error_after_deregistration() {
        let watchdog = WatchdogTimer::new(Duration::from_millis(WATCHDOG_THRESHOLD_MS));
        let registration = watchdog.register().unwrap();
        let hook = registration.hook();
        drop(registration);
        assert_eq!(hook.poll(), PollOutcome::Error as c_int);
    }

    #[test]
    fn test_hook_reports_error_for_dead_watchdog() {
        let watchdog = WatchdogTimer::new(Duration::from_millis(WATCHDOG_THRESHOLD_MS));
        let registration = watchdog.register().unwrap();
        let hook = registration.hook();
        drop(watchdog);
        assert_eq!(hook.poll(), PollOutcome::Error as c_int);
    }

    #[test]
    fn test_null_identity_is_an_error() {
        assert_eq!(interrupt_callback(std::ptr::null_mut()), PollOutcome::Error as c_int);
    }
}
