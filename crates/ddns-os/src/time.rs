//! Blocking sleep primitives used to pace the main loop
//!
//! [`sleep_ms`] is the plain primitive: it resumes after an interrupting
//! signal unless that signal asked the agent to terminate, in which case it
//! returns [`SleepOutcome::Interrupted`] early.
//!
//! [`pace_ms`] is what the main loop waits with between checks. It returns
//! early for any pending control signal, so "check now" and "reload" are
//! acted on right away. Neither call consumes the pending signal.

use std::time::{Duration, Instant};

use crate::signal;

// Upper bound on one uninterrupted pause, so a signal that lands between the
// flag check and the pause is noticed within this window.
#[cfg(unix)]
const MAX_SLICE: Duration = Duration::from_secs(1);
#[cfg(not(unix))]
const MAX_SLICE: Duration = Duration::from_millis(100);

/// How a sleep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed (or the request was `<= 0`)
    Completed,
    /// Returned early because a signal it watches for is pending
    Interrupted,
}

/// Block the calling thread for at least `ms` milliseconds
///
/// Zero or negative values return immediately. Only a pending termination
/// ends the sleep early.
pub fn sleep_ms(ms: i64) -> SleepOutcome {
    sleep_until(ms, signal::termination_pending)
}

/// Wait up to `ms` milliseconds, returning early on any pending control signal
pub fn pace_ms(ms: i64) -> SleepOutcome {
    sleep_until(ms, signal::any_pending)
}

fn sleep_until(ms: i64, wake: fn() -> bool) -> SleepOutcome {
    if ms <= 0 {
        return SleepOutcome::Completed;
    }
    if wake() {
        return SleepOutcome::Interrupted;
    }

    let deadline = Instant::now() + Duration::from_millis(ms as u64);
    loop {
        let now = Instant::now();
        if now >= deadline {
            return SleepOutcome::Completed;
        }
        pause((deadline - now).min(MAX_SLICE));
        if wake() {
            return SleepOutcome::Interrupted;
        }
    }
}

/// Sleep once for up to `remaining`; may return early on `EINTR`
#[cfg(unix)]
fn pause(remaining: Duration) {
    let request = libc::timespec {
        tv_sec: remaining.as_secs() as libc::time_t,
        tv_nsec: remaining.subsec_nanos() as libc::c_long,
    };
    // SAFETY: `request` is a valid timespec and the remainder pointer may be null.
    unsafe {
        libc::nanosleep(&request, std::ptr::null_mut());
    }
}

// Windows has no EINTR for sleeps; MAX_SLICE keeps the flag polling frequent
#[cfg(not(unix))]
fn pause(remaining: Duration) {
    std::thread::sleep(remaining);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_durations_return_immediately() {
        let start = Instant::now();
        assert_eq!(sleep_ms(0), SleepOutcome::Completed);
        assert_eq!(sleep_ms(-250), SleepOutcome::Completed);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn sleeps_at_least_the_requested_duration() {
        for ms in [1_i64, 20, 75] {
            let start = Instant::now();
            assert_eq!(sleep_ms(ms), SleepOutcome::Completed);
            assert!(
                start.elapsed() >= Duration::from_millis(ms as u64),
                "sleep_ms({}) returned after {:?}",
                ms,
                start.elapsed()
            );
        }
    }

    #[test]
    fn pace_returns_early_for_any_control_signal() {
        signal::flags().raise(signal::ControlSignal::CheckNow);

        let start = Instant::now();
        assert_eq!(pace_ms(5_000), SleepOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(1));

        // the signal is left for the main loop to take
        assert_eq!(signal::take_pending(), Some(signal::ControlSignal::CheckNow));
        assert_eq!(pace_ms(1), SleepOutcome::Completed);
    }
}
