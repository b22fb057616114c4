// # ddnsd - DDNS Daemon
//
// Thin integration layer over `ddns-os`. It owns the process lifecycle and
// nothing else:
//
// 1. Read configuration from environment variables
// 2. Start the socket subsystem and install the signal handler
// 3. Open the system log channel and the diagnostic sink
// 4. Run the paced check loop until a termination signal arrives
// 5. Shut down in a fixed order: sink, system log, socket subsystem
//
// The "check" step only resolves the configured hostname and runs the update
// hook when the answer changes. Talking to an update service is not done
// here.
//
// ## Configuration
//
// - `DDNS_HOSTNAME`: Hostname to watch (required)
// - `DDNS_IFACE`: Interface name passed to the hook (optional)
// - `DDNS_LOG_DEST`: Diagnostic destination (stdout, syslog, file)
// - `DDNS_LOG_FILE`: Log file path (for file)
// - `DDNS_SYSLOG_NAME`: Program name in the system log (default ddnsd)
// - `DDNS_UPDATE_COMMAND`: Hook template, e.g. `notify.sh $ip $host`
// - `DDNS_COMMAND_TIMEOUT_SECS`: Hook time budget (default 30)
// - `DDNS_POLL_INTERVAL_MS`: Delay between checks (default 600000)
// - `DDNS_LOG_LEVEL`: trace, debug, info, warn, error
// - `DDNS_BACKGROUND`: Detach from the console when set to 1
//
// ## Signals
//
// - SIGTERM / SIGINT: shut down
// - SIGHUP: re-read the log destination and reopen the sink
// - SIGUSR1: run the hook even if nothing changed
// - SIGUSR2: check right away instead of waiting out the interval
//
// ## Example
//
// ```bash
// export DDNS_HOSTNAME=home.example.com
// export DDNS_LOG_DEST=file
// export DDNS_LOG_FILE=/var/log/ddnsd.log
// export DDNS_UPDATE_COMMAND='logger -t ddns "$host is now $ip"'
//
// ddnsd
// ```

use anyhow::{Context, Result};
use ddns_os::signal::{self, ControlSignal};
use ddns_os::{
    CommandExecutor, CommandTemplate, Destination, DestinationKind, DiagnosticSink, IpSupport,
    LogDestinationConfig, OsConfig, Severity, SleepOutcome, SyslogChannel, UpdateFacts,
};
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DdnsExitCode> for ExitCode {
    fn from(code: DdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    hostname: String,
    iface: String,
    os: OsConfig,
    log_level: String,
    background: bool,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mut os = OsConfig::new();
        os.log = log_destination_from_env()?;
        if let Ok(name) = env::var("DDNS_SYSLOG_NAME") {
            os.syslog_name = name;
        }
        os.update_command = env::var("DDNS_UPDATE_COMMAND").ok();
        if let Ok(secs) = env::var("DDNS_COMMAND_TIMEOUT_SECS") {
            os.command_timeout_secs = secs
                .parse()
                .with_context(|| format!("DDNS_COMMAND_TIMEOUT_SECS '{}' is not a number", secs))?;
        }
        if let Ok(ms) = env::var("DDNS_POLL_INTERVAL_MS") {
            os.poll_interval_ms = ms
                .parse()
                .with_context(|| format!("DDNS_POLL_INTERVAL_MS '{}' is not a number", ms))?;
        }

        Ok(Self {
            hostname: env::var("DDNS_HOSTNAME").unwrap_or_default(),
            iface: env::var("DDNS_IFACE").unwrap_or_default(),
            os,
            log_level: env::var("DDNS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            background: env::var("DDNS_BACKGROUND").is_ok_and(|v| v == "1"),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            anyhow::bail!(
                "DDNS_HOSTNAME is required. \
                Set it via: export DDNS_HOSTNAME=home.example.com"
            );
        }

        self.os.validate()?;

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

fn log_destination_from_env() -> Result<LogDestinationConfig> {
    let kind: DestinationKind = env::var("DDNS_LOG_DEST")
        .unwrap_or_else(|_| "stdout".to_string())
        .parse()?;

    Ok(match kind {
        DestinationKind::Stdout => LogDestinationConfig::Stdout,
        DestinationKind::Syslog => LogDestinationConfig::Syslog { name: None },
        DestinationKind::File => LogDestinationConfig::File {
            path: env::var("DDNS_LOG_FILE")
                .map(PathBuf::from)
                .context("DDNS_LOG_FILE is required when DDNS_LOG_DEST=file")?,
        },
    })
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DdnsExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DdnsExitCode::ConfigError.into();
    }

    let ip = match IpSupport::startup() {
        Ok(ip) => ip,
        Err(e) => {
            eprintln!("Failed to start socket subsystem: {}", e);
            return DdnsExitCode::ConfigError.into();
        }
    };

    if let Err(e) = signal::install_flag_handler() {
        eprintln!("Failed to install signal handler: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    // Startup and shutdown notices go to the system log whatever the sink does
    let syslog = match ddns_os::syslog_open(&config.os.syslog_name) {
        Ok(channel) => Some(channel),
        Err(e) => {
            eprintln!("System log unavailable: {}", e);
            None
        }
    };

    let sink = Arc::new(DiagnosticSink::new());
    open_sink_with_fallback(&sink, &config.os);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level())
        .with_writer(sink.tracing_writer())
        .with_ansi(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    if config.background {
        if let Err(e) = ddns_os::close_console_window() {
            warn!("Failed to detach from console: {}", e);
        }
    }

    notice(&syslog, "starting");
    info!("Starting ddnsd for {}", config.hostname);

    let code = match run_daemon(&config, &sink, &ip) {
        Ok(()) => DdnsExitCode::CleanShutdown,
        Err(e) => {
            error!("Daemon error: {:#}", e);
            DdnsExitCode::RuntimeError
        }
    };

    info!("Shutting down daemon");
    notice(&syslog, "stopping");

    if let Err(e) = sink.close() {
        eprintln!("Failed to close diagnostic output: {}", e);
    }
    if let Some(channel) = syslog {
        ddns_os::syslog_close(channel);
    }
    if let Err(e) = ip.cleanup() {
        eprintln!("Socket subsystem cleanup failed: {}", e);
    }

    code.into()
}

fn notice(syslog: &Option<SyslogChannel>, message: &str) {
    if let Some(channel) = syslog {
        channel.write(Severity::Notice, message);
    }
}

/// Open the configured destination, falling back to the console
fn open_sink_with_fallback(sink: &DiagnosticSink, os: &OsConfig) {
    let destination = os.log.to_destination(&os.syslog_name);
    if let Err(e) = sink.open(destination) {
        eprintln!("{}; falling back to stdout", e);
        if let Err(e) = sink.open(Destination::Console) {
            eprintln!("Console output unavailable: {}", e);
        }
    }
}

/// Run the check loop until termination is requested
fn run_daemon(config: &Config, sink: &DiagnosticSink, ip: &IpSupport) -> Result<()> {
    let template = config.os.command_template()?;
    let executor = if template.is_some() {
        Some(CommandExecutor::new(config.os.command_timeout())?)
    } else {
        None
    };

    let mut last_address: Option<IpAddr> = None;
    let mut force = false;

    info!("Daemon initialized successfully");

    loop {
        match signal::take_pending() {
            Some(ControlSignal::Terminate) => {
                info!("Received termination signal");
                return Ok(());
            }
            Some(ControlSignal::Reload) => {
                info!("Reload requested, reopening diagnostic output");
                match log_destination_from_env() {
                    Ok(log) => {
                        let mut os = config.os.clone();
                        os.log = log;
                        open_sink_with_fallback(sink, &os);
                    }
                    Err(e) => warn!("Keeping current diagnostic output: {:#}", e),
                }
                continue;
            }
            Some(ControlSignal::ForceUpdate) => force = true,
            Some(ControlSignal::CheckNow) | None => {}
        }

        match resolve(ip, &config.hostname) {
            Ok(address) => {
                let changed = last_address != Some(address);
                if changed {
                    info!("{} resolves to {}", config.hostname, address);
                    last_address = Some(address);
                }
                if changed || force {
                    run_hook(config, template.as_ref(), executor.as_ref(), address);
                    force = false;
                }
            }
            Err(e) => warn!("Address check failed: {:#}", e),
        }

        if ddns_os::pace_ms(config.os.poll_interval_ms) == SleepOutcome::Interrupted {
            debug!("Woken early by a control signal");
        }
    }
}

/// Pick the address to report: the first publishable IPv4, else the first
fn resolve(ip: &IpSupport, hostname: &str) -> Result<IpAddr> {
    let addrs = ip.resolve_host(hostname)?;

    addrs
        .iter()
        .copied()
        .find(|addr| matches!(addr, IpAddr::V4(v4) if ddns_os::net::is_publishable(*v4)))
        .or_else(|| addrs.first().copied())
        .ok_or_else(|| anyhow::anyhow!("{} has no addresses", hostname))
}

fn run_hook(
    config: &Config,
    template: Option<&CommandTemplate>,
    executor: Option<&CommandExecutor>,
    address: IpAddr,
) {
    let (Some(template), Some(executor)) = (template, executor) else {
        return;
    };

    let facts = UpdateFacts::new(address, config.hostname.clone(), config.iface.clone());
    match executor.shell_execute(template.as_str(), facts) {
        Ok(status) if status.success() => info!("Update command succeeded"),
        Ok(status) => warn!("Update command exited with {:?}", status),
        Err(e) => error!("Update command failed: {}", e),
    }
}
