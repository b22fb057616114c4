//! Contract Test: Update Command Execution
//!
//! Constraints verified:
//! - Substitution into the template is exact
//! - Invalid templates never reach the launcher
//! - The child's exit status is returned unchanged
//! - A hung child is killed after the timeout
//! - Facts are also exported through the environment
//! - Facts reach the shell as literal words, never as shell code
//! - A shell that cannot be started is reported as a spawn failure

mod common;

use common::*;
use ddns_os::command::{
    CommandExecutor, CommandRunner, CommandTemplate, ShellRunner, UpdateCommand, UpdateFacts,
    shell_execute,
};
use ddns_os::Error;
use std::time::{Duration, Instant};

fn facts() -> UpdateFacts {
    UpdateFacts::new("203.0.113.5".parse().unwrap(), "box.example", "eth0")
}

#[tokio::test]
async fn runner_receives_the_substituted_line() {
    let runner = RecordingRunner::new(0);

    let status = shell_execute(&runner, "notify.sh $ip $host", facts())
        .await
        .unwrap();

    assert!(status.success());
    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].line, "notify.sh 203.0.113.5 box.example");
    assert!(calls[0]
        .env
        .contains(&("DDNS_IFACE".to_string(), "eth0".to_string())));
}

#[test]
fn invalid_templates_are_rejected_before_launch() {
    let runner = RecordingRunner::new(0);

    let result = tokio_test::block_on(shell_execute(&runner, "   ", facts()));
    assert!(matches!(result, Err(Error::InvalidTemplate(_))));

    let result = tokio_test::block_on(shell_execute(&runner, "hook ${ip", facts()));
    assert!(matches!(result, Err(Error::InvalidTemplate(_))));

    assert!(runner.calls().is_empty());
}

#[test]
fn blocking_executor_reports_exit_status() {
    let runner = RecordingRunner::new(7);
    let executor = CommandExecutor::with_runner(Box::new(runner.clone())).unwrap();

    let status = executor
        .shell_execute("hook $iface", facts())
        .unwrap();

    assert_eq!(status.code, Some(7));
    assert!(!status.success());
    assert_eq!(runner.calls()[0].line, "hook eth0");
}

#[cfg(unix)]
mod shell {
    use super::*;

    fn command(template: &str) -> UpdateCommand {
        UpdateCommand::new(CommandTemplate::parse(template).unwrap(), facts())
    }

    #[tokio::test]
    async fn exit_code_is_propagated() {
        let runner = ShellRunner::new(Duration::from_secs(10));
        let status = runner.run(&command("exit 3")).await.unwrap();
        assert_eq!(status.code, Some(3));
        assert_eq!(status.signal, None);
    }

    #[tokio::test]
    async fn child_sees_substituted_arguments_and_environment() {
        let runner = ShellRunner::new(Duration::from_secs(10));
        let status = runner
            .run(&command(
                r#"test "$ip" = "$DDNS_IP" && test "$DDNS_HOSTNAME" = box.example && test "$DDNS_IFACE" = $iface"#,
            ))
            .await
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn hung_child_is_killed_after_timeout() {
        let runner = ShellRunner::new(Duration::from_millis(200));
        let start = Instant::now();

        let err = runner.run(&command("sleep 30")).await.unwrap_err();

        assert!(matches!(err, Error::CommandTimeout(d) if d == Duration::from_millis(200)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn blocking_executor_runs_real_commands() {
        let executor = CommandExecutor::new(Duration::from_secs(10)).unwrap();
        let status = executor.shell_execute("exit 0", facts()).unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn hostile_facts_stay_literal_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("injected");
        let hostname = format!("box.example; touch {}", marker.display());
        let facts = UpdateFacts::new("203.0.113.5".parse().unwrap(), hostname, "$(id)");
        let command = UpdateCommand::new(
            CommandTemplate::parse(r#"test $host = "$DDNS_HOSTNAME" && test $iface = '$(id)'"#)
                .unwrap(),
            facts,
        );

        let status = ShellRunner::new(Duration::from_secs(10))
            .run(&command)
            .await
            .unwrap();

        assert!(status.success(), "quoted facts must compare equal");
        assert!(!marker.exists(), "hostname must not run as shell code");
    }

    #[tokio::test]
    async fn missing_shell_is_a_spawn_failure() {
        let runner = ShellRunner::new(Duration::from_secs(10)).with_shell("/nonexistent/ddns-sh");

        let err = runner.run(&command("exit 0")).await.unwrap_err();

        assert!(matches!(err, Error::Spawn(_)), "unexpected error: {:?}", err);
        assert_eq!(err.code(), 40);
    }
}
