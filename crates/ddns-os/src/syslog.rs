// # System Log Channel
//
// A dedicated channel to the platform system log, tagged with a program
// name. It can be opened before the diagnostic sink and closed after it so
// that startup and shutdown messages always reach the log.
//
// ```rust,ignore
// let channel = ddns_os::syslog_open("ddnsd")?;
// channel.write(Severity::Notice, "starting");
// // ... the sink may be redirected freely in between ...
// ddns_os::syslog_close(channel);
// ```
//
// The real backend is libc `openlog`/`syslog`/`closelog`. Other targets write
// `name: message` lines to stderr. Tests substitute their own
// [`SyslogBackend`].

use std::sync::Mutex;

use crate::error::{Error, Result};

/// Syslog severity levels (RFC 5424 order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Severity {
    /// Numeric syslog priority (0 = emergency, 7 = debug)
    pub fn priority(self) -> i32 {
        self as i32
    }
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Severity::Error,
            tracing::Level::WARN => Severity::Warning,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::DEBUG | tracing::Level::TRACE => Severity::Debug,
        }
    }
}

/// Transport behind a [`SyslogChannel`]
pub trait SyslogBackend: Send {
    /// Start tagging messages with `ident`
    fn open(&mut self, ident: &str) -> Result<()>;

    /// Emit one message
    fn log(&mut self, severity: Severity, message: &str);

    /// Stop using the system log
    fn close(&mut self);
}

/// System log channel tagged with a program name
pub struct SyslogChannel {
    name: String,
    backend: Mutex<Box<dyn SyslogBackend>>,
}

impl SyslogChannel {
    /// Open the platform system log, tagging every message with `name`
    pub fn open(name: &str) -> Result<Self> {
        Self::open_with(name, Box::new(PlatformSyslog::default()))
    }

    /// Open a channel on a caller-supplied backend
    pub fn open_with(name: &str, mut backend: Box<dyn SyslogBackend>) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::sink_unavailable("syslog program name cannot be empty"));
        }
        backend.open(name)?;
        Ok(Self {
            name: name.to_string(),
            backend: Mutex::new(backend),
        })
    }

    /// Program name tag
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write one message; trailing line breaks are dropped
    pub fn write(&self, severity: Severity, message: &str) {
        let message = message.trim_end_matches(['\r', '\n']);
        if let Ok(mut backend) = self.backend.lock() {
            backend.log(severity, message);
        }
    }

    /// Close the channel
    pub fn close(self) {}
}

impl Drop for SyslogChannel {
    fn drop(&mut self) {
        match self.backend.get_mut() {
            Ok(backend) => backend.close(),
            Err(poisoned) => poisoned.into_inner().close(),
        }
    }
}

impl std::fmt::Debug for SyslogChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyslogChannel")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Open the system log with program name `name`
pub fn syslog_open(name: &str) -> Result<SyslogChannel> {
    SyslogChannel::open(name)
}

/// Close a channel returned by [`syslog_open`]
pub fn syslog_close(channel: SyslogChannel) {
    channel.close();
}

#[cfg(unix)]
pub use libc_backend::LibcSyslog as PlatformSyslog;

#[cfg(not(unix))]
pub use stderr_backend::StderrSyslog as PlatformSyslog;

#[cfg(unix)]
mod libc_backend {
    use std::ffi::CString;
    use std::sync::{Mutex, MutexGuard};

    use super::{Severity, SyslogBackend};
    use crate::error::{Error, Result};

    // `openlog` keeps the ident pointer and the log itself is process-wide.
    // Idents are interned for the life of the process, the one `openlog` was
    // last called with is tracked in `active`, and `closelog` only runs when
    // the last channel closes.
    struct ProcessLog {
        idents: Vec<CString>,
        active: Option<usize>,
        open_count: usize,
    }

    impl ProcessLog {
        fn intern(&mut self, ident: CString) -> usize {
            match self.idents.iter().position(|known| *known == ident) {
                Some(index) => index,
                None => {
                    self.idents.push(ident);
                    self.idents.len() - 1
                }
            }
        }

        // Point the process log at `index` unless it already is
        fn activate(&mut self, index: usize) {
            if self.active == Some(index) {
                return;
            }
            // SAFETY: interned idents are never dropped, so the pointer stays valid.
            unsafe {
                libc::openlog(self.idents[index].as_ptr(), libc::LOG_PID, libc::LOG_DAEMON);
            }
            self.active = Some(index);
        }
    }

    static PROCESS_LOG: Mutex<ProcessLog> = Mutex::new(ProcessLog {
        idents: Vec::new(),
        active: None,
        open_count: 0,
    });

    fn process_log() -> MutexGuard<'static, ProcessLog> {
        PROCESS_LOG
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn c_string(text: &str) -> CString {
        let bytes: Vec<u8> = text.bytes().filter(|b| *b != 0).collect();
        CString::new(bytes).unwrap_or_default()
    }

    /// libc-backed system log
    ///
    /// Each backend remembers its own ident and re-tags the process log
    /// before writing when another channel has retagged it since.
    #[derive(Debug, Default)]
    pub struct LibcSyslog {
        ident: Option<usize>,
    }

    impl SyslogBackend for LibcSyslog {
        fn open(&mut self, ident: &str) -> Result<()> {
            if self.ident.is_some() {
                return Err(Error::sink_unavailable("syslog backend already open"));
            }
            let mut log = process_log();
            let index = log.intern(c_string(ident));
            log.activate(index);
            log.open_count += 1;
            self.ident = Some(index);
            Ok(())
        }

        fn log(&mut self, severity: Severity, message: &str) {
            let Some(index) = self.ident else {
                return;
            };
            let message = c_string(message);
            // Held across the write so no other channel can retag in between
            let mut log = process_log();
            log.activate(index);
            // SAFETY: constant "%s" format with one NUL-terminated argument.
            unsafe {
                libc::syslog(severity.priority(), c"%s".as_ptr(), message.as_ptr());
            }
        }

        fn close(&mut self) {
            if self.ident.take().is_none() {
                return;
            }
            let mut log = process_log();
            log.open_count = log.open_count.saturating_sub(1);
            if log.open_count == 0 {
                // SAFETY: no channel uses the log any more.
                unsafe { libc::closelog() };
                log.active = None;
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn active_ident() -> Option<String> {
            let log = process_log();
            log.active
                .map(|index| log.idents[index].to_string_lossy().into_owned())
        }

        #[test]
        fn each_channel_writes_under_its_own_tag() {
            let mut standalone = LibcSyslog::default();
            let mut redirected = LibcSyslog::default();

            standalone.open("ddns-os-test-agentd").unwrap();
            standalone.log(Severity::Debug, "first");
            assert_eq!(active_ident().as_deref(), Some("ddns-os-test-agentd"));

            redirected.open("ddns-os-test-other").unwrap();
            redirected.log(Severity::Debug, "redirected");
            assert_eq!(active_ident().as_deref(), Some("ddns-os-test-other"));

            redirected.close();
            standalone.log(Severity::Debug, "second");
            assert_eq!(active_ident().as_deref(), Some("ddns-os-test-agentd"));

            standalone.close();
            assert_eq!(active_ident(), None);
        }

        #[test]
        fn closed_backend_writes_nothing() {
            let mut backend = LibcSyslog::default();
            backend.log(Severity::Debug, "never opened");
            backend.close();
            assert!(backend.ident.is_none());
        }
    }
}

#[cfg(not(unix))]
mod stderr_backend {
    use std::io::Write;

    use super::{Severity, SyslogBackend};
    use crate::error::Result;

    /// Stand-in system log for targets without syslog
    #[derive(Debug, Default)]
    pub struct StderrSyslog {
        ident: String,
    }

    impl SyslogBackend for StderrSyslog {
        fn open(&mut self, ident: &str) -> Result<()> {
            self.ident = ident.to_string();
            Ok(())
        }

        fn log(&mut self, _severity: Severity, message: &str) {
            let _ = writeln!(std::io::stderr(), "{}: {}", self.ident, message);
        }

        fn close(&mut self) {}
    }
}
