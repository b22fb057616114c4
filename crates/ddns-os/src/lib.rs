// # ddns-os
//
// Operating-system abstraction layer for the DDNS agent.
//
// Every other part of the agent goes through this crate for the things that
// differ between platforms:
//
// - **time**: signal-aware blocking sleep and the main loop's pacing wait
// - **socket**: socket subsystem startup/cleanup and the last socket error
// - **signal**: one handler for the control signals, plus lock-free flags
// - **sink** / **syslog**: switchable diagnostic output and the system log
// - **command**: the "on successful update" hook
// - **console**: detaching from the console when going to the background
// - **net**: IPv4 address classification
//
// ## Main loop shape
//
// ```rust,ignore
// let ip = IpSupport::startup()?;
// signal::install_flag_handler()?;
// let syslog = syslog_open("ddnsd")?;
// let sink = Arc::new(DiagnosticSink::new());
// sink.open(Destination::Console)?;
//
// loop {
//     match signal::take_pending() {
//         Some(ControlSignal::Terminate) => break,
//         Some(ControlSignal::Reload) => { /* reopen the sink */ }
//         Some(ControlSignal::ForceUpdate) => { /* run the hook regardless */ }
//         Some(ControlSignal::CheckNow) | None => {}
//     }
//     // ... address check, maybe executor.shell_execute(..) ...
//     time::pace_ms(interval_ms);
// }
//
// sink.close()?;
// syslog_close(syslog);
// ip.cleanup()?;
// ```
//
// ## Concurrency
//
// One control thread drives the agent. The only other context is signal
// delivery, which only writes to `SignalFlags`. The sink and the socket gate
// are still safe to share across threads: sink operations are serialized and
// startup is guarded by a one-shot state machine.

pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod net;
pub mod signal;
pub mod sink;
pub mod socket;
pub mod syslog;
pub mod time;

// Re-export core types for convenience
pub use command::{
    CommandExecutor, CommandRunner, CommandStatus, CommandTemplate, ShellRunner, UpdateCommand,
    UpdateFacts, shell_execute,
};
pub use config::{LogDestinationConfig, OsConfig};
pub use console::close_console_window;
pub use error::{Error, Result};
pub use signal::{ControlSignal, SignalFlags, install_flag_handler, install_signal_handler};
pub use sink::{Destination, DestinationKind, DiagnosticSink, SinkMakeWriter};
pub use socket::{IpSupport, SocketErrorCode, SubsystemState, get_socket_error};
pub use syslog::{Severity, SyslogChannel, syslog_close, syslog_open};
pub use time::{SleepOutcome, pace_ms, sleep_ms};
