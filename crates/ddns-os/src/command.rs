// # Update Command Executor
//
// Runs the user's "on successful update" hook with the discovered facts.
//
// ## Template
//
// | Placeholder                 | Replaced with        |
// |-----------------------------|----------------------|
// | `$ip` / `${ip}`             | resolved address     |
// | `$host` / `${host}`         | hostname             |
// | `$hostname` / `${hostname}` | hostname             |
// | `$iface` / `${iface}`       | network interface    |
//
// A placeholder is the whole identifier after `$`, so `$ipaddr` is not `$ip`.
// Anything else (`$HOME`, `$1`, `$$`) is passed through untouched for the
// shell to expand.
//
// Substituted values are shell words: a value made only of
// `[A-Za-z0-9._:-]` goes in as is, anything else is quoted so the shell
// sees it as one literal argument. `$host` with `a.example; reboot` renders
// as `'a.example; reboot'` (`"..."` under `cmd`).
//
// The child also gets the facts as `DDNS_IP`, `DDNS_HOSTNAME` and
// `DDNS_IFACE` in its environment.
//
// ## Launch discipline
//
// The line runs under `/bin/sh -c` (`cmd /C` on Windows) with stdin closed
// and stdout/stderr inherited. A child that outlives its timeout is killed
// and reported as `Error::CommandTimeout`, so a hung hook cannot stall the
// main loop. Interpreting the exit status is the caller's job.

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default time budget for one hook run
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable carrying the resolved address
pub const ENV_IP: &str = "DDNS_IP";
/// Environment variable carrying the hostname
pub const ENV_HOSTNAME: &str = "DDNS_HOSTNAME";
/// Environment variable carrying the network interface
pub const ENV_IFACE: &str = "DDNS_IFACE";

/// Facts discovered by the update logic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFacts {
    /// Address the hostname now resolves to
    pub address: IpAddr,
    /// Hostname that was updated
    pub hostname: String,
    /// Interface the address was found on (may be empty)
    pub iface: String,
}

impl UpdateFacts {
    /// Bundle the facts for one hook run
    pub fn new(address: IpAddr, hostname: impl Into<String>, iface: impl Into<String>) -> Self {
        Self {
            address,
            hostname: hostname.into(),
            iface: iface.into(),
        }
    }
}

/// Substitutable fact inside a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Ip,
    Hostname,
    Iface,
}

impl Placeholder {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ip" => Some(Self::Ip),
            "host" | "hostname" => Some(Self::Hostname),
            "iface" => Some(Self::Iface),
            _ => None,
        }
    }

    fn value(self, facts: &UpdateFacts) -> String {
        match self {
            Self::Ip => facts.address.to_string(),
            Self::Hostname => facts.hostname.clone(),
            Self::Iface => facts.iface.clone(),
        }
    }
}

enum Segment {
    Text(String),
    Fact(Placeholder),
}

/// A parsed command template
#[derive(Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    raw: String,
}

impl CommandTemplate {
    /// Parse a template, rejecting blank ones and unterminated `${`
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::invalid_template("command template is empty"));
        }
        let template = Self { raw };
        template.segments()?;
        Ok(template)
    }

    /// The template as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Placeholders used by this template, in order of appearance
    pub fn placeholders(&self) -> Vec<Placeholder> {
        self.segments()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Fact(p) => Some(p),
                Segment::Text(_) => None,
            })
            .collect()
    }

    /// Substitute `facts` into the template
    pub fn render(&self, facts: &UpdateFacts) -> String {
        let mut line = String::with_capacity(self.raw.len() + 32);
        for segment in self.segments().unwrap_or_default() {
            match segment {
                Segment::Text(text) => line.push_str(&text),
                Segment::Fact(p) => line.push_str(&shell_word(&p.value(facts))),
            }
        }
        line
    }

    fn segments(&self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = self.raw.as_str();

        while let Some(pos) = rest.find('$') {
            text.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            let (name, consumed, braced) = if let Some(inner) = after.strip_prefix('{') {
                let end = inner.find('}').ok_or_else(|| {
                    Error::invalid_template(format!("unterminated '${{' in {:?}", self.raw))
                })?;
                (&inner[..end], end + 2, true)
            } else {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end, false)
            };

            match Placeholder::from_name(name) {
                Some(p) => {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Fact(p));
                }
                None => {
                    text.push('$');
                    if braced {
                        text.push('{');
                        text.push_str(name);
                        text.push('}');
                    } else {
                        text.push_str(name);
                    }
                }
            }
            rest = &after[consumed..];
        }

        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(segments)
    }
}

fn is_plain_word(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

/// Quote `value` as one shell word unless it is already safe
pub fn shell_word(value: &str) -> Cow<'_, str> {
    if is_plain_word(value) {
        return Cow::Borrowed(value);
    }

    #[cfg(not(windows))]
    {
        Cow::Owned(format!("'{}'", value.replace('\'', "'\\''")))
    }
    #[cfg(windows)]
    {
        let inner: String = value.chars().filter(|c| !matches!(c, '"' | '%')).collect();
        Cow::Owned(format!("\"{}\"", inner))
    }
}

impl fmt::Debug for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CommandTemplate").field(&self.raw).finish()
    }
}

impl std::str::FromStr for CommandTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// One hook invocation: template plus facts
#[derive(Debug, Clone)]
pub struct UpdateCommand {
    template: CommandTemplate,
    facts: UpdateFacts,
}

impl UpdateCommand {
    /// Pair a template with the facts to substitute
    pub fn new(template: CommandTemplate, facts: UpdateFacts) -> Self {
        Self { template, facts }
    }

    /// The final command line
    pub fn command_line(&self) -> String {
        self.template.render(&self.facts)
    }

    /// Environment passed to the child in addition to the inherited one
    pub fn env(&self) -> [(&'static str, String); 3] {
        [
            (ENV_IP, self.facts.address.to_string()),
            (ENV_HOSTNAME, self.facts.hostname.clone()),
            (ENV_IFACE, self.facts.iface.clone()),
        ]
    }

    /// The facts this command carries
    pub fn facts(&self) -> &UpdateFacts {
        &self.facts
    }
}

/// Exit status of a finished hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// Exit code, if the child exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the child was killed (Unix only)
    pub signal: Option<i32>,
}

impl CommandStatus {
    /// Status for a normal exit with `code`
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Whether the child exited with code 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for CommandStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Launches hook commands
///
/// Isolates process spawning so callers can be tested against a fake.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion (or until the runner's timeout)
    async fn run(&self, command: &UpdateCommand) -> Result<CommandStatus>;
}

/// Runs commands through the platform shell
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
    shell: PathBuf,
}

#[cfg(not(windows))]
const DEFAULT_SHELL: &str = "/bin/sh";
#[cfg(not(windows))]
const SHELL_FLAG: &str = "-c";

#[cfg(windows)]
const DEFAULT_SHELL: &str = "cmd";
#[cfg(windows)]
const SHELL_FLAG: &str = "/C";

impl ShellRunner {
    /// Shell runner that kills children after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            shell: PathBuf::from(DEFAULT_SHELL),
        }
    }

    /// Use `shell` instead of the platform default
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Shell the command line is handed to
    pub fn shell_path(&self) -> &Path {
        &self.shell
    }

    fn shell(&self, line: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg(SHELL_FLAG).arg(line);
        cmd
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &UpdateCommand) -> Result<CommandStatus> {
        let line = command.command_line();
        let mut child = self
            .shell(&line)
            .envs(command.env())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::spawn(format!("{} ({}): {}", line, self.shell.display(), e)))?;

        let waited = tokio::time::timeout(self.timeout, child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                let status = CommandStatus::from(status);
                debug!("Command {:?} finished with {:?}", line, status);
                Ok(status)
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => {
                warn!("Command {:?} exceeded {:?}, killing it", line, self.timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed-out command: {}", e);
                }
                Err(Error::CommandTimeout(self.timeout))
            }
        }
    }
}

/// Build the command line from `template` and run it with `runner`
///
/// # Returns
///
/// - `Ok(CommandStatus)`: the child ran; its status is returned as-is
/// - `Err(Error::InvalidTemplate)`: blank or malformed template
/// - `Err(Error::Spawn)`: the shell could not be started
/// - `Err(Error::CommandTimeout)`: the child was killed after the timeout
pub async fn shell_execute(
    runner: &dyn CommandRunner,
    template: &str,
    facts: UpdateFacts,
) -> Result<CommandStatus> {
    let command = UpdateCommand::new(CommandTemplate::parse(template)?, facts);
    info!("Running update command: {}", command.command_line());
    runner.run(&command).await
}

/// Blocking front end for a synchronous main loop
///
/// Owns a current-thread runtime, so it must not be used from inside
/// another tokio runtime.
pub struct CommandExecutor {
    runner: Box<dyn CommandRunner>,
    runtime: tokio::runtime::Runtime,
}

impl CommandExecutor {
    /// Executor over a [`ShellRunner`] with `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_runner(Box::new(ShellRunner::new(timeout)))
    }

    /// Executor over a caller-supplied runner
    pub fn with_runner(runner: Box<dyn CommandRunner>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { runner, runtime })
    }

    /// Render and run `template` with `facts`, blocking until done
    pub fn shell_execute(&self, template: &str, facts: UpdateFacts) -> Result<CommandStatus> {
        self.runtime
            .block_on(shell_execute(self.runner.as_ref(), template, facts))
    }

    /// Run an already-built command, blocking until done
    pub fn run_blocking(&self, command: &UpdateCommand) -> Result<CommandStatus> {
        self.runtime.block_on(self.runner.run(command))
    }
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor").finish_non_exhaustive()
    }
}
