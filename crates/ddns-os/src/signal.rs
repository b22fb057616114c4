// # Signal Installer
//
// Registers one handler for every control signal the agent reacts to.
//
// ## Recognized signals
//
// | Signal  | Meaning                       | ControlSignal |
// |---------|-------------------------------|---------------|
// | SIGTERM | graceful termination          | Terminate     |
// | SIGINT  | interactive termination       | Terminate     |
// | SIGHUP  | reload configuration          | Reload        |
// | SIGUSR1 | force an update now           | ForceUpdate   |
// | SIGUSR2 | check the address now         | CheckNow      |
//
// Windows only knows SIGINT, SIGTERM and SIGBREAK (mapped to Terminate).
//
// ## Handler discipline
//
// A handler runs asynchronously, interrupting whatever the main thread is
// doing. It must only touch lock-free state. The built-in handler installed by
// [`install_flag_handler`] stores into [`SignalFlags`]; the main loop polls
// [`take_pending`] between iterations and does the real work itself.
//
// Handlers are installed without `SA_RESTART` so that a blocking sleep sees
// `EINTR` and can notice a pending termination.

use std::ffi::c_int;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use tracing::debug;

use crate::error::{Error, Result};

/// Raw handler signature accepted by [`install_signal_handler`]
pub type SignalHandler = extern "C" fn(c_int);

/// What a delivered signal asks the agent to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    /// Stop the main loop and shut down
    Terminate,
    /// Reload settings without restarting
    Reload,
    /// Push an update even if the address looks unchanged
    ForceUpdate,
    /// Cut the pacing wait short and check the address
    CheckNow,
}

impl ControlSignal {
    /// Map a raw signal number to its control meaning
    pub fn from_raw(signum: c_int) -> Option<Self> {
        RECOGNIZED
            .iter()
            .find(|(raw, _, _)| *raw == signum)
            .map(|(_, _, control)| *control)
    }
}

#[cfg(unix)]
const RECOGNIZED: &[(c_int, &str, ControlSignal)] = &[
    (libc::SIGTERM, "SIGTERM", ControlSignal::Terminate),
    (libc::SIGINT, "SIGINT", ControlSignal::Terminate),
    (libc::SIGHUP, "SIGHUP", ControlSignal::Reload),
    (libc::SIGUSR1, "SIGUSR1", ControlSignal::ForceUpdate),
    (libc::SIGUSR2, "SIGUSR2", ControlSignal::CheckNow),
];

#[cfg(windows)]
const RECOGNIZED: &[(c_int, &str, ControlSignal)] = &[
    (2, "SIGINT", ControlSignal::Terminate),
    (15, "SIGTERM", ControlSignal::Terminate),
    (21, "SIGBREAK", ControlSignal::Terminate),
];

/// Names of the signals [`install_signal_handler`] registers for
pub fn recognized_signals() -> impl Iterator<Item = &'static str> {
    RECOGNIZED.iter().map(|(_, name, _)| *name)
}

/// Register `handler` for every recognized control signal
///
/// Re-installing replaces the previous handler; handlers never chain.
/// Stops at the first signal that cannot be registered and reports it.
pub fn install_signal_handler(handler: SignalHandler) -> Result<()> {
    for (signum, name, _) in RECOGNIZED {
        register(*signum, name, handler)?;
        debug!("Installed handler for {}", name);
    }
    Ok(())
}

/// Register the built-in handler that records signals into [`SignalFlags`]
pub fn install_flag_handler() -> Result<()> {
    install_signal_handler(record_signal)
}

#[cfg(unix)]
fn register(signum: c_int, name: &'static str, handler: SignalHandler) -> Result<()> {
    // SAFETY: the sigaction struct is zero-initialized, its mask is set up with
    // sigemptyset/sigaddset, and the handler is a plain extern "C" fn that
    // lives for the whole process.
    let rc = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        for (other, _, _) in RECOGNIZED {
            libc::sigaddset(&mut action.sa_mask, *other);
        }
        libc::sigaction(signum, &action, std::ptr::null_mut())
    };

    if rc != 0 {
        return Err(Error::signal_registration(
            name,
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

#[cfg(windows)]
fn register(signum: c_int, name: &'static str, handler: SignalHandler) -> Result<()> {
    unsafe extern "C" {
        fn signal(signum: c_int, handler: usize) -> usize;
    }
    const SIG_ERR: usize = usize::MAX;

    // SAFETY: CRT `signal` with a valid extern "C" function pointer.
    let previous = unsafe { signal(signum, handler as usize) };
    if previous == SIG_ERR {
        return Err(Error::signal_registration(
            name,
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

extern "C" fn record_signal(signum: c_int) {
    FLAGS.record_raw(signum);
    // CRT `signal` resets the disposition after each delivery
    #[cfg(windows)]
    {
        let _ = register(signum, "", record_signal);
    }
}

/// Lock-free record of control signals awaiting the main loop
///
/// Every method is async-signal-safe: only atomic loads and stores.
#[derive(Debug)]
pub struct SignalFlags {
    terminate: AtomicBool,
    reload: AtomicBool,
    force_update: AtomicBool,
    check_now: AtomicBool,
    last_raw: AtomicI32,
}

impl SignalFlags {
    /// Create an empty flag set
    pub const fn new() -> Self {
        Self {
            terminate: AtomicBool::new(false),
            reload: AtomicBool::new(false),
            force_update: AtomicBool::new(false),
            check_now: AtomicBool::new(false),
            last_raw: AtomicI32::new(0),
        }
    }

    /// Mark `signal` as pending
    pub fn raise(&self, signal: ControlSignal) {
        self.slot(signal).store(true, Ordering::SeqCst);
    }

    /// Record a raw signal number; unrecognized numbers only update
    /// [`SignalFlags::last_raw`]
    pub fn record_raw(&self, signum: c_int) {
        self.last_raw.store(signum, Ordering::SeqCst);
        if let Some(signal) = ControlSignal::from_raw(signum) {
            self.raise(signal);
        }
    }

    /// Take the most urgent pending signal, clearing it
    ///
    /// Priority: Terminate, Reload, ForceUpdate, CheckNow.
    pub fn take_pending(&self) -> Option<ControlSignal> {
        [
            ControlSignal::Terminate,
            ControlSignal::Reload,
            ControlSignal::ForceUpdate,
            ControlSignal::CheckNow,
        ]
        .into_iter()
        .find(|signal| self.slot(*signal).swap(false, Ordering::SeqCst))
    }

    /// Whether a termination request is pending (does not clear it)
    pub fn termination_pending(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Whether any control signal is pending (does not clear it)
    pub fn any_pending(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
            || self.reload.load(Ordering::SeqCst)
            || self.force_update.load(Ordering::SeqCst)
            || self.check_now.load(Ordering::SeqCst)
    }

    /// Raw number of the most recently recorded signal, or 0
    pub fn last_raw(&self) -> c_int {
        self.last_raw.load(Ordering::SeqCst)
    }

    /// Drop every pending signal
    pub fn clear(&self) {
        for slot in [
            &self.terminate,
            &self.reload,
            &self.force_update,
            &self.check_now,
        ] {
            slot.store(false, Ordering::SeqCst);
        }
        self.last_raw.store(0, Ordering::SeqCst);
    }

    fn slot(&self, signal: ControlSignal) -> &AtomicBool {
        match signal {
            ControlSignal::Terminate => &self.terminate,
            ControlSignal::Reload => &self.reload,
            ControlSignal::ForceUpdate => &self.force_update,
            ControlSignal::CheckNow => &self.check_now,
        }
    }
}

impl Default for SignalFlags {
    fn default() -> Self {
        Self::new()
    }
}

static FLAGS: SignalFlags = SignalFlags::new();

/// Process-wide flags written by the built-in handler
pub fn flags() -> &'static SignalFlags {
    &FLAGS
}

/// Take the most urgent pending signal from the process-wide flags
pub fn take_pending() -> Option<ControlSignal> {
    FLAGS.take_pending()
}

/// Whether the process-wide flags hold a pending termination request
pub fn termination_pending() -> bool {
    FLAGS.termination_pending()
}

/// Whether the process-wide flags hold any pending control signal
pub fn any_pending() -> bool {
    FLAGS.any_pending()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_pending_respects_priority_and_clears() {
        let flags = SignalFlags::new();
        flags.raise(ControlSignal::CheckNow);
        flags.raise(ControlSignal::Reload);
        flags.raise(ControlSignal::Terminate);

        assert!(flags.termination_pending());
        assert_eq!(flags.take_pending(), Some(ControlSignal::Terminate));
        assert!(!flags.termination_pending());
        assert_eq!(flags.take_pending(), Some(ControlSignal::Reload));
        assert_eq!(flags.take_pending(), Some(ControlSignal::CheckNow));
        assert_eq!(flags.take_pending(), None);
    }

    #[test]
    fn raise_is_idempotent() {
        let flags = SignalFlags::new();
        flags.raise(ControlSignal::ForceUpdate);
        flags.raise(ControlSignal::ForceUpdate);

        assert!(flags.any_pending());
        assert!(!flags.termination_pending());
        assert_eq!(flags.take_pending(), Some(ControlSignal::ForceUpdate));
        assert_eq!(flags.take_pending(), None);
        assert!(!flags.any_pending());
    }

    #[cfg(unix)]
    #[test]
    fn raw_numbers_map_to_control_signals() {
        assert_eq!(ControlSignal::from_raw(libc::SIGTERM), Some(ControlSignal::Terminate));
        assert_eq!(ControlSignal::from_raw(libc::SIGINT), Some(ControlSignal::Terminate));
        assert_eq!(ControlSignal::from_raw(libc::SIGHUP), Some(ControlSignal::Reload));
        assert_eq!(ControlSignal::from_raw(libc::SIGUSR1), Some(ControlSignal::ForceUpdate));
        assert_eq!(ControlSignal::from_raw(libc::SIGUSR2), Some(ControlSignal::CheckNow));
        assert_eq!(ControlSignal::from_raw(libc::SIGPIPE), None);
    }

    #[cfg(unix)]
    #[test]
    fn unrecognized_raw_signal_sets_no_flag() {
        let flags = SignalFlags::new();
        flags.record_raw(libc::SIGPIPE);

        assert_eq!(flags.last_raw(), libc::SIGPIPE);
        assert_eq!(flags.take_pending(), None);

        flags.clear();
        assert_eq!(flags.last_raw(), 0);
    }
}
