//! Tests that launch an app's script through its descriptor and check
//! what the script saw.

use indoc::indoc;
use launchspec::{
    command::{Command, ExitStatus, Invocation},
    Ecosystem,
};
use pretty_assertions::assert_eq;

use crate::common::{read_results, write_files};

mod common;

const DESCRIPTOR: &str = r#"
module.exports = {
  apps: [{
    name: "budget-diary",
    script: "run.sh",
    interpreter: "/bin/sh",
    args: "first second",
    env: {
      GREETING: "hello",
      PORT: 8000,
    },
    env_production: {
      GREETING: "bonjour",
    },
  }],
};
"#;

const SCRIPT: &str = r#"echo "$GREETING $PORT $1 $2 ${LAUNCHSPEC_TEST_INHERITED:-unset}" >> {temp_path}/results.txt
exit ${EXIT_CODE:-0}
"#;

async fn run(target: Option<&str>, clean_env: bool, descriptor: &str) -> (ExitStatus, String) {
    let dir = write_files(&[("ecosystem.config.js", descriptor), ("run.sh", SCRIPT)]);

    let ecosystem = Ecosystem::load(dir.path().join("ecosystem.config.js")).unwrap();
    let app = ecosystem.app(None).unwrap();
    let invocation = Invocation::for_app(app, target, dir.path(), clean_env);

    let mut command = Command::run(&invocation).unwrap();
    let exit_status = command.wait().await;

    (exit_status, read_results(&dir).await)
}

/// The script receives the descriptor's env and arguments, on top of
/// the caller's environment.
#[test_log::test(tokio::test)]
async fn script_sees_descriptor_env() {
    std::env::set_var("LAUNCHSPEC_TEST_INHERITED", "inherited");

    let (exit_status, output) = run(None, false, DESCRIPTOR).await;

    assert_eq!(ExitStatus::Exited(0), exit_status);
    assert_eq!(
        indoc! {r#"
            hello 8000 first second inherited
        "#},
        output
    );
}

/// The target's env block overrides the base env.
#[test_log::test(tokio::test)]
async fn target_overrides_base_env() {
    let (exit_status, output) = run(Some("production"), true, DESCRIPTOR).await;

    assert_eq!(ExitStatus::Exited(0), exit_status);
    assert_eq!(
        indoc! {r#"
            bonjour 8000 first second unset
        "#},
        output
    );
}

/// With a clean environment, only `PATH` and the descriptor env reach
/// the script.
#[test_log::test(tokio::test)]
async fn clean_env_drops_caller_variables() {
    std::env::set_var("LAUNCHSPEC_TEST_INHERITED", "inherited");

    let (exit_status, output) = run(None, true, DESCRIPTOR).await;

    assert_eq!(ExitStatus::Exited(0), exit_status);
    assert_eq!(
        indoc! {r#"
            hello 8000 first second unset
        "#},
        output
    );
}

/// The script's exit code is reported as-is.
#[test_log::test(tokio::test)]
async fn exit_code_is_reported() {
    let descriptor = DESCRIPTOR.replace("PORT: 8000,", "PORT: 8000, EXIT_CODE: '3',");

    let (exit_status, output) = run(None, true, &descriptor).await;

    assert_eq!(ExitStatus::Exited(3), exit_status);
    assert_eq!("hello 8000 first second unset\n", output);
}

/// Without an `interpreter`, a `.sh` script runs under bash, so it does
/// not need to be executable.
#[test_log::test(tokio::test)]
async fn shell_scripts_run_without_execute_bit() {
    let descriptor = DESCRIPTOR.replace("    interpreter: \"/bin/sh\",\n", "");
    assert!(!descriptor.contains("interpreter"));
    std::env::set_var("LAUNCHSPEC_TEST_INHERITED", "inherited");

    let (exit_status, output) = run(None, false, &descriptor).await;

    assert_eq!(ExitStatus::Exited(0), exit_status);
    assert_eq!("hello 8000 first second inherited\n", output);
}

/// A script that dies from a signal reports the signal.
#[test_log::test(tokio::test)]
async fn signal_deaths_are_reported() {
    let dir = write_files(&[
        ("ecosystem.config.js", DESCRIPTOR),
        ("run.sh", "echo started >> {temp_path}/results.txt\nkill -TERM $$\n"),
    ]);

    let ecosystem = Ecosystem::load(dir.path().join("ecosystem.config.js")).unwrap();
    let invocation = Invocation::for_app(ecosystem.app(None).unwrap(), None, dir.path(), true);
    let exit_status = Command::run(&invocation).unwrap().wait().await;

    assert_eq!(ExitStatus::Signaled(15), exit_status);
    assert_eq!("started\n", read_results(&dir).await);
}

/// A script that cannot be started is an error, not an exit status.
#[test_log::test(tokio::test)]
async fn missing_interpreter_fails_to_spawn() {
    let descriptor = DESCRIPTOR.replace("/bin/sh", "/nonexistent/interpreter");
    let dir = write_files(&[("ecosystem.config.js", &descriptor)]);

    let ecosystem = Ecosystem::load(dir.path().join("ecosystem.config.js")).unwrap();
    let invocation = Invocation::for_app(ecosystem.app(None).unwrap(), None, dir.path(), true);

    assert!(matches!(
        Command::run(&invocation),
        Err(launchspec::Error::Spawn { program, .. }) if program == "/nonexistent/interpreter"
    ));
}
