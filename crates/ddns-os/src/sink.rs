// # Diagnostic Sink
//
// The single, switchable destination for the agent's status output.
//
// ## States
//
// ```text
//            open(dest)             open(other)
//  Closed ───────────────▶ Open(dest) ──────────▶ Open(other)
//    ▲                        │          (old one closed first)
//    └──────── close() ───────┘
// ```
//
// Exactly one destination is active at a time. Opening a new one closes the
// previous one before the new one is opened, so no write can reach two
// destinations. `close()` on a closed sink does nothing.
//
// ## Destinations
//
// - **Console**: standard output
// - **Syslog**: the system log, tagged with a program name
// - **File**: appended to a path; one record per write call
//
// ## Tracing integration
//
// [`SinkMakeWriter`] implements `tracing_subscriber::fmt::MakeWriter`, so a
// subscriber installed once follows the sink through every redirect.
//
// Nothing in this module emits tracing events while holding the sink lock:
// the subscriber writes back into the same sink.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tracing_subscriber::fmt::MakeWriter;

use crate::error::{Error, Result};
use crate::syslog::{PlatformSyslog, Severity, SyslogBackend, SyslogChannel};

/// Destination kind, mirroring the agent's `DBG_*_LOG` settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// Standard output
    Stdout,
    /// System log
    Syslog,
    /// Append-only file
    File,
}

impl std::str::FromStr for DestinationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stdout" | "console" => Ok(Self::Stdout),
            "syslog" => Ok(Self::Syslog),
            "file" => Ok(Self::File),
            other => Err(Error::config(format!(
                "unknown log destination '{}' (expected stdout, syslog or file)",
                other
            ))),
        }
    }
}

/// A fully specified destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Standard output
    Console,
    /// System log, tagged with `name`
    Syslog { name: String },
    /// Append to the file at `path`
    File { path: PathBuf },
}

impl Destination {
    /// Build a destination from a kind plus the parameters it uses
    ///
    /// `name` only matters for syslog and `logfile` only for files.
    pub fn from_parts(kind: DestinationKind, name: &str, logfile: Option<&Path>) -> Result<Self> {
        match kind {
            DestinationKind::Stdout => Ok(Self::Console),
            DestinationKind::Syslog => Ok(Self::Syslog {
                name: name.to_string(),
            }),
            DestinationKind::File => match logfile {
                Some(path) if !path.as_os_str().is_empty() => Ok(Self::File {
                    path: path.to_path_buf(),
                }),
                _ => Err(Error::sink_unavailable("file destination requires a log file path")),
            },
        }
    }

    /// Kind of this destination
    pub fn kind(&self) -> DestinationKind {
        match self {
            Self::Console => DestinationKind::Stdout,
            Self::Syslog { .. } => DestinationKind::Syslog,
            Self::File { .. } => DestinationKind::File,
        }
    }
}

/// Factory for the platform streams a sink writes to
///
/// The default [`PlatformIo`] uses real stdout and the real system log;
/// tests swap in capturing implementations.
pub trait SinkIo: Send + Sync {
    /// A handle to the console stream
    fn console(&self) -> Box<dyn Write + Send>;

    /// A fresh system log backend
    fn syslog(&self) -> Box<dyn SyslogBackend>;
}

/// Real stdout and system log
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformIo;

impl SinkIo for PlatformIo {
    fn console(&self) -> Box<dyn Write + Send> {
        Box::new(io::stdout())
    }

    fn syslog(&self) -> Box<dyn SyslogBackend> {
        Box::new(PlatformSyslog::default())
    }
}

enum ActiveSink {
    Console(Box<dyn Write + Send>),
    Syslog(SyslogChannel),
    File { path: PathBuf, file: File },
}

impl ActiveSink {
    fn kind(&self) -> DestinationKind {
        match self {
            Self::Console(_) => DestinationKind::Stdout,
            Self::Syslog(_) => DestinationKind::Syslog,
            Self::File { .. } => DestinationKind::File,
        }
    }

    fn write_record(&mut self, severity: Severity, message: &str) -> io::Result<()> {
        match self {
            Self::Console(out) => {
                write_line(out, message)?;
                out.flush()
            }
            Self::Syslog(channel) => {
                channel.write(severity, message);
                Ok(())
            }
            Self::File { file, .. } => write_line(file, message),
        }
    }

    fn shutdown(self) -> io::Result<()> {
        match self {
            Self::Console(mut out) => out.flush(),
            Self::Syslog(channel) => {
                channel.close();
                Ok(())
            }
            Self::File { mut file, .. } => {
                file.flush()?;
                file.sync_data()
            }
        }
    }
}

// One record per call: the line and its terminator go out in a single write
fn write_line<W: Write + ?Sized>(out: &mut W, message: &str) -> io::Result<()> {
    if message.ends_with('\n') {
        out.write_all(message.as_bytes())
    } else {
        let mut record = String::with_capacity(message.len() + 1);
        record.push_str(message);
        record.push('\n');
        out.write_all(record.as_bytes())
    }
}

enum SinkState {
    Closed,
    Open(ActiveSink),
}

/// Process-wide diagnostic output
///
/// Share it behind an `Arc`; every operation takes `&self` and is
/// serialized internally.
pub struct DiagnosticSink {
    state: Mutex<SinkState>,
    io: Box<dyn SinkIo>,
    discarded: AtomicU64,
}

impl DiagnosticSink {
    /// Create a closed sink over the real platform streams
    pub fn new() -> Self {
        Self::with_io(Box::new(PlatformIo))
    }

    /// Create a closed sink over caller-supplied streams
    pub fn with_io(io: Box<dyn SinkIo>) -> Self {
        Self {
            state: Mutex::new(SinkState::Closed),
            io,
            discarded: AtomicU64::new(0),
        }
    }

    /// Switch output to `destination`
    ///
    /// The current destination, if any, is closed first. If the new one
    /// cannot be opened the sink stays closed and the error is returned;
    /// falling back (usually to the console) is up to the caller. A failure
    /// to close the old destination is only logged once the new one is live.
    pub fn open(&self, destination: Destination) -> Result<()> {
        let kind = destination.kind();
        let (closed, opened) = {
            let mut state = self.lock();
            let previous = std::mem::replace(&mut *state, SinkState::Closed);
            let closed = match previous {
                SinkState::Open(active) => active.shutdown(),
                SinkState::Closed => Ok(()),
            };
            let opened = self.activate(destination).map(|active| {
                *state = SinkState::Open(active);
            });
            (closed, opened)
        };

        if let Err(e) = &closed {
            warn!("Previous diagnostic output did not close cleanly: {}", e);
        }
        match &opened {
            Ok(()) => debug!("Diagnostic output switched to {:?}", kind),
            Err(e) => debug!("Diagnostic output {:?} unavailable: {}", kind, e),
        }
        opened
    }

    /// Open by kind, the way the agent's settings describe a destination
    pub fn open_dbg_output(
        &self,
        kind: DestinationKind,
        name: &str,
        logfile: Option<&Path>,
    ) -> Result<()> {
        self.open(Destination::from_parts(kind, name, logfile)?)
    }

    /// Close the current destination; a closed sink is left alone
    pub fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lock(), SinkState::Closed);
        match previous {
            SinkState::Open(active) => active.shutdown().map_err(Error::from),
            SinkState::Closed => Ok(()),
        }
    }

    /// Write one record to the current destination
    ///
    /// While closed, the record is dropped and counted in
    /// [`DiagnosticSink::discarded`].
    pub fn write(&self, severity: Severity, message: &str) -> Result<()> {
        let mut state = self.lock();
        match &mut *state {
            SinkState::Open(active) => active.write_record(severity, message).map_err(Error::from),
            SinkState::Closed => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Kind of the open destination, or `None` when closed
    pub fn current(&self) -> Option<DestinationKind> {
        match &*self.lock() {
            SinkState::Open(active) => Some(active.kind()),
            SinkState::Closed => None,
        }
    }

    /// Path of the log file when the file destination is open
    pub fn log_file(&self) -> Option<PathBuf> {
        match &*self.lock() {
            SinkState::Open(ActiveSink::File { path, .. }) => Some(path.clone()),
            _ => None,
        }
    }

    /// Records dropped because the sink was closed
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// `MakeWriter` adapter for `tracing_subscriber`
    pub fn tracing_writer(self: &Arc<Self>) -> SinkMakeWriter {
        SinkMakeWriter {
            sink: Arc::clone(self),
        }
    }

    fn activate(&self, destination: Destination) -> Result<ActiveSink> {
        match destination {
            Destination::Console => Ok(ActiveSink::Console(self.io.console())),
            Destination::Syslog { name } => {
                SyslogChannel::open_with(&name, self.io.syslog()).map(ActiveSink::Syslog)
            }
            Destination::File { path } => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| {
                        Error::sink_unavailable(format!(
                            "cannot open log file {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                Ok(ActiveSink::File { path, file })
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DiagnosticSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticSink")
            .field("current", &self.current())
            .field("discarded", &self.discarded())
            .finish_non_exhaustive()
    }
}

/// `tracing_subscriber` writer factory bound to a [`DiagnosticSink`]
#[derive(Debug, Clone)]
pub struct SinkMakeWriter {
    sink: Arc<DiagnosticSink>,
}

/// Buffers one formatted event and hands it to the sink as one record
pub struct SinkWriter<'a> {
    sink: &'a DiagnosticSink,
    severity: Severity,
    buffer: Vec<u8>,
}

impl Write for SinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SinkWriter<'_> {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let record = String::from_utf8_lossy(&self.buffer);
        let _ = self.sink.write(self.severity, &record);
    }
}

impl<'a> MakeWriter<'a> for SinkMakeWriter {
    type Writer = SinkWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter {
            sink: &self.sink,
            severity: Severity::Info,
            buffer: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        SinkWriter {
            sink: &self.sink,
            severity: Severity::from(*meta.level()),
            buffer: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BufferIo(SharedBuffer);

    impl SinkIo for BufferIo {
        fn console(&self) -> Box<dyn Write + Send> {
            Box::new(self.0.clone())
        }

        fn syslog(&self) -> Box<dyn SyslogBackend> {
            Box::new(PlatformSyslog::default())
        }
    }

    fn console_text(buffer: &SharedBuffer) -> String {
        String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn closed_sink_discards_and_counts() {
        let sink = DiagnosticSink::with_io(Box::new(BufferIo(SharedBuffer::default())));
        assert_eq!(sink.current(), None);

        sink.write(Severity::Info, "lost").unwrap();
        sink.write(Severity::Info, "lost too").unwrap();
        assert_eq!(sink.discarded(), 2);

        // closing twice is harmless
        sink.close().unwrap();
        sink.close().unwrap();
    }

    #[test]
    fn console_records_get_one_newline() {
        let buffer = SharedBuffer::default();
        let sink = DiagnosticSink::with_io(Box::new(BufferIo(buffer.clone())));

        sink.open(Destination::Console).unwrap();
        sink.write(Severity::Info, "one").unwrap();
        sink.write(Severity::Info, "two\n").unwrap();
        sink.close().unwrap();

        assert_eq!(console_text(&buffer), "one\ntwo\n");
    }

    #[test]
    fn file_destination_requires_a_path() {
        let err = Destination::from_parts(DestinationKind::File, "", None).unwrap_err();
        assert!(matches!(err, Error::SinkUnavailable(_)));

        let console = Destination::from_parts(DestinationKind::Stdout, "ignored", None).unwrap();
        assert_eq!(console, Destination::Console);
    }

    #[test]
    fn failed_open_leaves_sink_closed() {
        let buffer = SharedBuffer::default();
        let sink = DiagnosticSink::with_io(Box::new(BufferIo(buffer.clone())));
        sink.open(Destination::Console).unwrap();

        let dir = tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("agent.log");
        let err = sink
            .open(Destination::File { path: missing })
            .unwrap_err();

        assert!(matches!(err, Error::SinkUnavailable(_)));
        assert_eq!(sink.current(), None);

        sink.write(Severity::Info, "after failure").unwrap();
        assert_eq!(console_text(&buffer), "");
    }

    #[test]
    fn tracing_events_follow_the_sink() {
        let buffer = SharedBuffer::default();
        let sink = Arc::new(DiagnosticSink::with_io(Box::new(BufferIo(buffer.clone()))));
        sink.open(Destination::Console).unwrap();

        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.tracing_writer())
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("address check complete");
        });

        let text = console_text(&buffer);
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("INFO"));
        assert!(text.contains("address check complete"));
    }

    struct UnflushableIo;

    struct Unflushable;

    impl Write for Unflushable {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "console gone"))
        }
    }

    impl SinkIo for UnflushableIo {
        fn console(&self) -> Box<dyn Write + Send> {
            Box::new(Unflushable)
        }

        fn syslog(&self) -> Box<dyn SyslogBackend> {
            Box::new(PlatformSyslog::default())
        }
    }

    #[test]
    fn switch_succeeds_when_old_destination_fails_to_close() {
        let sink = DiagnosticSink::with_io(Box::new(UnflushableIo));
        sink.open(Destination::Console).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.log");
        sink.open(Destination::File { path: path.clone() }).unwrap();

        assert_eq!(sink.current(), Some(DestinationKind::File));
        assert_eq!(sink.log_file(), Some(path));
    }
}
