//! Test doubles shared by the contract tests
//!
//! These stand in for the platform streams and the process launcher so the
//! contracts can be checked without real stdout, syslog or child processes.

#![allow(dead_code)]

use ddns_os::command::{CommandRunner, CommandStatus, UpdateCommand};
use ddns_os::error::Result;
use ddns_os::sink::SinkIo;
use ddns_os::syslog::{Severity, SyslogBackend};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// An in-memory console shared between the sink and the test
#[derive(Clone, Default)]
pub struct SharedConsole(Arc<Mutex<Vec<u8>>>);

impl SharedConsole {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }
}

impl Write for SharedConsole {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One message as the system log would have stored it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogEntry {
    pub ident: String,
    pub severity: Severity,
    pub message: String,
}

/// Captures everything sent to the system log
#[derive(Clone, Default)]
pub struct SyslogCapture {
    entries: Arc<Mutex<Vec<SyslogEntry>>>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl SyslogCapture {
    pub fn entries(&self) -> Vec<SyslogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn backend(&self) -> Box<dyn SyslogBackend> {
        Box::new(CaptureBackend {
            ident: None,
            capture: self.clone(),
        })
    }
}

struct CaptureBackend {
    ident: Option<String>,
    capture: SyslogCapture,
}

impl SyslogBackend for CaptureBackend {
    fn open(&mut self, ident: &str) -> Result<()> {
        self.ident = Some(ident.to_string());
        self.capture.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn log(&mut self, severity: Severity, message: &str) {
        let ident = self.ident.clone().unwrap_or_default();
        self.capture.entries.lock().unwrap().push(SyslogEntry {
            ident,
            severity,
            message: message.to_string(),
        });
    }

    fn close(&mut self) {
        if self.ident.take().is_some() {
            self.capture.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Sink I/O wired to a shared console and a syslog capture
#[derive(Clone, Default)]
pub struct CapturingIo {
    pub console: SharedConsole,
    pub syslog: SyslogCapture,
}

impl SinkIo for CapturingIo {
    fn console(&self) -> Box<dyn Write + Send> {
        Box::new(self.console.clone())
    }

    fn syslog(&self) -> Box<dyn SyslogBackend> {
        self.syslog.backend()
    }
}

/// A command line plus environment as the runner received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub line: String,
    pub env: Vec<(String, String)>,
}

/// A CommandRunner that records invocations instead of launching anything
#[derive(Clone)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<RecordedCommand>>>,
    exit_code: i32,
}

impl RecordingRunner {
    pub fn new(exit_code: i32) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            exit_code,
        }
    }

    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &UpdateCommand) -> Result<CommandStatus> {
        self.calls.lock().unwrap().push(RecordedCommand {
            line: command.command_line(),
            env: command
                .env()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        });
        Ok(CommandStatus::exited(self.exit_code))
    }
}
