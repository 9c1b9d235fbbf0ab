//! Launches an app's script once and monitors its completion.

use std::{
    env,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::Stdio,
};

use command_group::AsyncCommandGroup;
use nix::unistd::Pid;
use tokio::sync::watch;
use tracing::Level;

use crate::{AppDescriptor, Error, Result};

/// Exit status returned by a command.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ExitStatus {
    /// Command exited with the given exit code.
    Exited(i32),

    /// Command was terminated by the given signal.
    Signaled(i32),

    /// Command ended without an exit code or signal we could read.
    Killed,
}

/// `interpreter` value that runs the script directly.
pub const NO_INTERPRETER: &str = "none";

/// Interpreters chosen by script extension when the descriptor names
/// none.
const INTERPRETERS: &[(&str, &str)] = &[
    ("sh", "bash"),
    ("bash", "bash"),
    ("py", "python3"),
    ("js", "node"),
    ("cjs", "node"),
    ("mjs", "node"),
    ("ts", "ts-node"),
    ("rb", "ruby"),
    ("php", "php"),
    ("pl", "perl"),
];

/// Returns the program that runs `app`'s script, or `None` if the
/// script is executed directly.
pub fn interpreter_for(app: &AppDescriptor) -> Option<String> {
    match app.interpreter.as_deref() {
        Some(NO_INTERPRETER) => None,
        Some(interpreter) => Some(interpreter.to_owned()),
        None => {
            let ext = Path::new(&app.script).extension()?.to_str()?;
            INTERPRETERS
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, interpreter)| (*interpreter).to_owned())
        }
    }
}

/// Fully resolved program, arguments, working directory, and
/// environment for one launch of an app.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,

    /// Pass only `PATH` and the descriptor env, instead of inheriting
    /// the caller's environment.
    pub clean_env: bool,
}

impl Invocation {
    /// Resolves `app` for `target`. Relative paths in the descriptor
    /// are relative to `base_dir` (the directory holding the file).
    pub fn for_app(
        app: &AppDescriptor,
        target: Option<&str>,
        base_dir: &Path,
        clean_env: bool,
    ) -> Self {
        let cwd = match &app.cwd {
            Some(cwd) => base_dir.join(cwd),
            None => base_dir.to_owned(),
        };

        let script = cwd.join(&app.script).to_string_lossy().into_owned();
        let extra_args = app.args.as_ref().map(|args| args.to_vec()).unwrap_or_default();

        let (program, args) = match interpreter_for(app) {
            Some(interpreter) => (
                interpreter,
                std::iter::once(script).chain(extra_args).collect(),
            ),
            None => (script, extra_args),
        };

        let env = app
            .resolve_env(target)
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect();

        Self {
            name: app.name.clone(),
            program,
            args,
            cwd,
            env,
            clean_env,
        }
    }
}

/// Handle used to signal a running command.
#[derive(Copy, Clone, Debug)]
pub struct CommandControl {
    pid: Pid,
}

impl CommandControl {
    /// Sends a signal to the command's process group.
    pub fn kill(&self, signal: nix::sys::signal::Signal) -> nix::Result<()> {
        nix::sys::signal::killpg(self.pid, signal)
    }
}

#[derive(Debug)]
pub struct Command {
    exited: watch::Receiver<Option<ExitStatus>>,
    control: CommandControl,
}

impl Command {
    pub fn run(invocation: &Invocation) -> Result<Self> {
        let Invocation {
            name,
            program,
            args,
            cwd,
            env: vars,
            clean_env,
        } = invocation;

        tracing::event!(Level::DEBUG, %name, %program, ?args, cwd = %cwd.display(), "Running command");

        // Initialize the command.
        let mut command = tokio::process::Command::new(program);
        command.args(args).current_dir(cwd);

        // Either start from an empty environment (keeping only `PATH`)
        // or inherit ours, then add the descriptor's variables.
        if *clean_env {
            command.env_clear();

            if let Ok(path) = env::var("PATH") {
                command.env("PATH", path);
            }
        }

        command.envs(vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        // Disable stdin, and map stdout and stderr to our own stdout
        // and stderr.
        command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // Run the command in its own process group, so that signals
        // reach anything the script starts.
        let child = command.group_spawn().map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = match child.id() {
            Some(id) => Pid::from_raw(id as i32),
            None => {
                return Err(Error::Spawn {
                    program: program.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "process exited before its PID could be read",
                    ),
                })
            }
        };

        tracing::event!(Level::DEBUG, %name, %pid, "Command running");

        // Listen for the command to complete.
        let (sender, receiver) = watch::channel(None);
        monitor_process(name.to_owned(), pid, child, sender);

        Ok(Self {
            exited: receiver,
            control: CommandControl { pid },
        })
    }

    pub fn control(&self) -> CommandControl {
        self.control
    }

    /// Waits for the process to exit.
    pub async fn wait(&mut self) -> ExitStatus {
        loop {
            // Return the value immediately if we have one, otherwise
            // ignore the initial `None` value that will still be
            // present if the process has not yet stopped.
            if let Some(exit_status) = *self.exited.borrow_and_update() {
                tracing::event!(Level::DEBUG, pid = %self.control.pid, "Command exited");
                return exit_status;
            }

            // The monitor always sends before dropping the sender, so a
            // closed channel means the status above was already seen.
            if self.exited.changed().await.is_err() {
                return (*self.exited.borrow()).unwrap_or(ExitStatus::Killed);
            }
        }
    }
}

fn monitor_process(
    name: String,
    pid: Pid,
    mut child: command_group::AsyncGroupChild,
    sender: watch::Sender<Option<ExitStatus>>,
) {
    tokio::spawn(async move {
        match child.wait().await {
            Err(err) => {
                tracing::event!(Level::ERROR, %name, ?err, "Error waiting for command to exit");
                let _ = sender.send(Some(ExitStatus::Killed));
            }
            Ok(exit_status) => match exit_status.code() {
                Some(exit_code) => {
                    if exit_code == 0 {
                        tracing::event!(Level::DEBUG, %name, %pid, "Command exited cleanly");
                    } else {
                        tracing::event!(Level::ERROR, %name, %pid, %exit_code, "Command exited with non-zero exit code");
                    }

                    let _ = sender.send(Some(ExitStatus::Exited(exit_code)));
                }
                None => match exit_status.signal() {
                    Some(signal) => {
                        tracing::event!(Level::DEBUG, %name, %pid, %signal, "Command was killed by a signal");
                        let _ = sender.send(Some(ExitStatus::Signaled(signal)));
                    }
                    None => {
                        tracing::event!(Level::DEBUG, %name, %pid, "Command was killed");
                        let _ = sender.send(Some(ExitStatus::Killed));
                    }
                },
            },
        }
    });
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{interpreter_for, Invocation};
    use crate::Ecosystem;

    fn ecosystem(app: serde_json::Value) -> Ecosystem {
        Ecosystem::from_value(json!({ "apps": [app] })).expect("Failed to decode test ecosystem")
    }

    #[test]
    fn resolves_script_against_the_descriptor_directory() {
        let ecosystem = ecosystem(json!({
            "name": "budget-diary",
            "script": "../public_html/budget_diary/run.sh",
            "args": "--port 8000",
            "env": { "DB_HOST": "127.0.0.1:3306", "PORT": 8000 },
            "env_production": { "DB_HOST": "db:3306" }
        }));
        let app = ecosystem.app(None).expect("app");

        assert_eq!(
            Invocation {
                name: String::from("budget-diary"),
                program: String::from("bash"),
                args: vec![
                    String::from("/srv/diary/../public_html/budget_diary/run.sh"),
                    String::from("--port"),
                    String::from("8000"),
                ],
                cwd: PathBuf::from("/srv/diary"),
                env: vec![
                    (String::from("DB_HOST"), String::from("db:3306")),
                    (String::from("PORT"), String::from("8000")),
                ],
                clean_env: false,
            },
            Invocation::for_app(app, Some("production"), Path::new("/srv/diary"), false)
        );
    }

    #[test]
    fn interpreter_runs_the_script() {
        let ecosystem = ecosystem(json!({
            "name": "budget-diary",
            "script": "main.py",
            "cwd": "app",
            "interpreter": "python3",
            "args": ["--reload"]
        }));
        let app = ecosystem.app(None).expect("app");
        let invocation = Invocation::for_app(app, None, Path::new("/srv"), true);

        assert_eq!("python3", invocation.program);
        assert_eq!(
            vec![String::from("/srv/app/main.py"), String::from("--reload")],
            invocation.args
        );
        assert_eq!(PathBuf::from("/srv/app"), invocation.cwd);
        assert!(invocation.env.is_empty());
    }

    #[test]
    fn interpreter_follows_the_script_extension() {
        let resolve = |script: &str, interpreter: Option<&str>| {
            let mut app = json!({ "name": "x", "script": script });
            if let Some(interpreter) = interpreter {
                app["interpreter"] = json!(interpreter);
            }
            interpreter_for(ecosystem(app).app(None).expect("app"))
        };

        assert_eq!(Some(String::from("bash")), resolve("run.sh", None));
        assert_eq!(Some(String::from("python3")), resolve("main.py", None));
        assert_eq!(Some(String::from("node")), resolve("server.js", None));
        assert_eq!(None, resolve("bin/diary", None));
        assert_eq!(None, resolve("run.sh", Some("none")));
        assert_eq!(
            Some(String::from("/usr/bin/python3.11")),
            resolve("run.sh", Some("/usr/bin/python3.11"))
        );

        let direct = ecosystem(json!({ "name": "x", "script": "run.sh", "interpreter": "none" }));
        let invocation =
            Invocation::for_app(direct.app(None).expect("app"), None, Path::new("/srv"), false);
        assert_eq!("/srv/run.sh", invocation.program);
        assert!(invocation.args.is_empty());
    }
}
