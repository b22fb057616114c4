// # Socket Subsystem Lifecycle
//
// Brings the platform socket environment up and down exactly once per
// startup/cleanup pair.
//
// ## State machine
//
// ```text
//  Uninitialized ──startup()──▶ Started ──cleanup()──▶ Stopped
//                                  ▲                     │
//                                  └──────startup()──────┘
// ```
//
// `startup()` hands out an [`IpSupport`] guard. Only the holder of that guard
// can clean up, so "cleanup without startup" cannot be expressed. A second
// `startup()` while a guard is alive fails with `Error::AlreadyStarted`.
//
// ## Platforms
//
// - Windows: `WSAStartup(2.2)` / `WSACleanup`
// - Everything else: no environment to manage, both steps succeed
//
// ## Last socket error
//
// [`get_socket_error`] reads a thread-local slot that socket helpers update
// through [`record_socket_result`]: success clears it, failure stores the raw
// OS code (errno on Unix, the WSA error space on Windows).

use std::cell::Cell;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Lifecycle of the process-wide socket environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemState {
    /// `startup()` has never succeeded
    Uninitialized,
    /// Sockets may be used
    Started,
    /// Cleaned up; sockets are invalid until the next `startup()`
    Stopped,
}

impl SubsystemState {
    /// Current process-wide state
    pub fn current() -> Self {
        Self::from_u8(STATE.load(Ordering::SeqCst))
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            STARTED => Self::Started,
            STOPPED => Self::Stopped,
            _ => Self::Uninitialized,
        }
    }
}

const UNINITIALIZED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(UNINITIALIZED);

/// Proof that the socket environment is up
///
/// Dropping the guard without calling [`IpSupport::cleanup`] still
/// releases the environment.
#[derive(Debug)]
pub struct IpSupport {
    released: bool,
}

impl IpSupport {
    /// Initialize the socket environment
    ///
    /// # Returns
    ///
    /// - `Ok(IpSupport)`: environment ready
    /// - `Err(Error::AlreadyStarted)`: a guard is already alive
    /// - `Err(Error::Transport)`: the platform refused to initialize
    pub fn startup() -> Result<Self> {
        let previous = STATE.load(Ordering::SeqCst);
        if previous == STARTED
            || STATE
                .compare_exchange(previous, STARTED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(Error::AlreadyStarted);
        }

        if let Err(e) = platform::startup() {
            STATE.store(previous, Ordering::SeqCst);
            return Err(e);
        }

        debug!("Socket subsystem started");
        Ok(Self { released: false })
    }

    /// Release the socket environment
    pub fn cleanup(mut self) -> Result<()> {
        self.release()
    }

    /// Fail with `Error::SubsystemNotReady` unless the environment is up
    pub fn ensure_ready() -> Result<()> {
        match SubsystemState::current() {
            SubsystemState::Started => Ok(()),
            _ => Err(Error::SubsystemNotReady),
        }
    }

    /// Open a TCP connection, recording the outcome as the last socket error
    pub fn connect_tcp(&self, addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
        Self::ensure_ready()?;
        let result = TcpStream::connect_timeout(&addr, timeout);
        record_socket_result(&result);
        result.map_err(|e| {
            let code = SocketErrorCode::from_io(&e).raw();
            Error::transport(code, format!("connect to {} failed: {}", addr, e))
        })
    }

    /// Resolve `host`, recording the outcome as the last socket error
    pub fn resolve_host(&self, host: &str) -> Result<Vec<IpAddr>> {
        Self::ensure_ready()?;
        let result = (host, 0).to_socket_addrs();
        record_socket_result(&result);
        let addrs = result.map_err(|e| {
            let code = SocketErrorCode::from_io(&e).raw();
            Error::transport(code, format!("cannot resolve {}: {}", host, e))
        })?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        STATE.store(STOPPED, Ordering::SeqCst);
        platform::cleanup()?;
        debug!("Socket subsystem stopped");
        Ok(())
    }
}

impl Drop for IpSupport {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Socket subsystem cleanup failed: {}", e);
        }
    }
}

/// Normalized socket error code; `0` means no error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SocketErrorCode(i32);

impl SocketErrorCode {
    /// The "no error" sentinel
    pub const NONE: Self = Self(0);

    /// Code used when an error carries no OS error number
    pub const UNKNOWN: Self = Self(-1);

    /// Wrap a raw OS code
    pub fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Normalize an I/O error into the socket error space
    pub fn from_io(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(0) | None => Self::UNKNOWN,
            Some(raw) => Self(raw),
        }
    }

    /// Raw integer value
    pub fn raw(self) -> i32 {
        self.0
    }

    /// Whether this is the "no error" sentinel
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for SocketErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "no error")
        } else if *self == Self::UNKNOWN {
            write!(f, "unknown socket error")
        } else {
            write!(f, "{} (os error {})", io::Error::from_raw_os_error(self.0), self.0)
        }
    }
}

thread_local! {
    static LAST_SOCKET_ERROR: Cell<SocketErrorCode> = const { Cell::new(SocketErrorCode::NONE) };
}

/// The last socket error observed on the calling thread
pub fn get_socket_error() -> SocketErrorCode {
    LAST_SOCKET_ERROR.with(Cell::get)
}

/// Update the calling thread's last socket error from an operation's result
pub fn record_socket_result<T>(result: &io::Result<T>) {
    let code = match result {
        Ok(_) => SocketErrorCode::NONE,
        Err(e) => SocketErrorCode::from_io(e),
    };
    LAST_SOCKET_ERROR.with(|slot| slot.set(code));
}

#[cfg(windows)]
mod platform {
    use crate::error::{Error, Result};

    #[repr(C, align(8))]
    struct WsaData([u8; 512]);

    #[link(name = "ws2_32")]
    unsafe extern "system" {
        fn WSAStartup(version: u16, data: *mut WsaData) -> i32;
        fn WSACleanup() -> i32;
        fn WSAGetLastError() -> i32;
    }

    pub(super) fn startup() -> Result<()> {
        let mut data = WsaData([0; 512]);
        // SAFETY: `data` is large enough for WSADATA on every target.
        let rc = unsafe { WSAStartup(0x0202, &mut data) };
        if rc != 0 {
            return Err(Error::transport(rc, "WSAStartup failed"));
        }
        Ok(())
    }

    pub(super) fn cleanup() -> Result<()> {
        // SAFETY: paired with a successful WSAStartup by the state machine.
        if unsafe { WSACleanup() } != 0 {
            let code = unsafe { WSAGetLastError() };
            return Err(Error::transport(code, "WSACleanup failed"));
        }
        Ok(())
    }
}

#[cfg(not(windows))]
mod platform {
    use crate::error::Result;

    pub(super) fn startup() -> Result<()> {
        Ok(())
    }

    pub(super) fn cleanup() -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_io_keeps_os_codes() {
        let err = io::Error::from_raw_os_error(111);
        assert_eq!(SocketErrorCode::from_io(&err).raw(), 111);
    }

    #[test]
    fn synthetic_errors_are_not_the_sentinel() {
        let err = io::Error::new(io::ErrorKind::Other, "synthetic");
        let code = SocketErrorCode::from_io(&err);
        assert_eq!(code, SocketErrorCode::UNKNOWN);
        assert!(!code.is_none());
    }

    #[test]
    fn record_tracks_the_latest_result_per_thread() {
        record_socket_result::<()>(&Err(io::Error::from_raw_os_error(104)));
        assert_eq!(get_socket_error().raw(), 104);

        record_socket_result(&Ok(()));
        assert!(get_socket_error().is_none());

        record_socket_result::<()>(&Err(io::Error::from_raw_os_error(110)));
        let other_thread = std::thread::spawn(get_socket_error).join().unwrap();
        assert!(other_thread.is_none());
        assert_eq!(get_socket_error().raw(), 110);
    }

    #[test]
    fn display_describes_the_sentinel() {
        assert_eq!(SocketErrorCode::NONE.to_string(), "no error");
    }
}
