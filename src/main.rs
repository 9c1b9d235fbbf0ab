//! Command-line front end for checking and launching ecosystem
//! descriptors.

#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_debug_implementations,
    nonstandard_style,
    missing_docs,
    unreachable_pub,
    missing_copy_implementations,
    unused_qualifications,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::WrapErr;
use console::style;
use launchspec::{
    command::{Command, ExitStatus, Invocation},
    descriptor::watch::WatchMatcher,
    dsn,
    format::Format,
    lint::{self, LintPolicy, Severity},
    variants::{self, Variant},
    Ecosystem,
};
use nix::sys::signal::Signal;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};

#[derive(Parser)]
#[clap(about, long_about = None)]
struct Cli {
    /// Log debug output.
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and lint descriptor files.
    Check {
        /// Lint policy (TOML); defaults to the built-in policy.
        #[clap(long)]
        policy: Option<PathBuf>,

        #[clap(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print a descriptor in normalized form.
    Show {
        #[clap(long, value_enum, default_value_t = OutputFormat::Js)]
        format: OutputFormat,

        file: PathBuf,
    },

    /// Print the environment an app runs with.
    Env {
        #[clap(flatten)]
        selection: Selection,

        file: PathBuf,
    },

    /// Report settings that differ between variant files.
    Drift {
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },

    /// Fold variant files into one descriptor with per-target env blocks.
    Consolidate {
        #[clap(long, value_enum, default_value_t = OutputFormat::Js)]
        format: OutputFormat,

        #[clap(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the database URL built from the app's `DB_*` variables.
    Dsn {
        #[clap(flatten)]
        selection: Selection,

        #[clap(long, default_value = dsn::DEFAULT_SCHEME)]
        scheme: String,

        file: PathBuf,
    },

    /// Report whether changes to the given paths would restart the app.
    WatchTest {
        /// App to test; defaults to the only app in the file.
        #[clap(long)]
        app: Option<String>,

        file: PathBuf,

        #[clap(required = true)]
        paths: Vec<String>,
    },

    /// Run the app's script once in the foreground.
    Exec {
        #[clap(flatten)]
        selection: Selection,

        /// Pass only PATH and the descriptor env to the script.
        #[clap(long)]
        clean_env: bool,

        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct Selection {
    /// App to use; defaults to the only app in the file.
    #[clap(long)]
    app: Option<String>,

    /// Target whose `env_<target>` block is applied.
    #[clap(long = "env")]
    target: Option<String>,
}

#[derive(Copy, Clone, ValueEnum)]
enum OutputFormat {
    Js,
    Json,
    Toml,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Js => Format::Js,
            OutputFormat::Json => Format::Json,
            OutputFormat::Toml => Format::Toml,
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;

    // Parse the command line arguments.
    let cli = Cli::parse();

    // Set the RUST_LOG, if it hasn't been explicitly defined
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", if cli.verbose { "debug" } else { "info" })
    }

    // Logs go to stderr; stdout carries rendered descriptors.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check { policy, files } => check(policy.as_deref(), &files),
        Commands::Show { format, file } => {
            let ecosystem = load(&file)?;
            print!("{}", Format::from(format).render(&ecosystem)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Env { selection, file } => {
            let ecosystem = load(&file)?;
            let app = ecosystem.app(selection.app.as_deref())?;
            for (key, value) in app.resolve_env(selection.target.as_deref()) {
                println!("{key}={value}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Drift { files } => {
            let variants = load_variants(&files)?;
            let drifts = variants::drift(&variants);
            for drift in &drifts {
                println!("{} {}", style(&drift.app).bold(), drift.field);
                for (label, value) in &drift.values {
                    println!("  {label}: {}", value.as_deref().unwrap_or("<absent>"));
                }
            }
            Ok(if drifts.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Consolidate { format, files } => {
            let variants = load_variants(&files)?;
            let ecosystem = variants::consolidate(&variants)?;
            print!("{}", Format::from(format).render(&ecosystem)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Dsn {
            selection,
            scheme,
            file,
        } => {
            let ecosystem = load(&file)?;
            let app = ecosystem.app(selection.app.as_deref())?;
            let env = app.resolve_env(selection.target.as_deref());
            println!("{}", dsn::database_url(&env, &scheme)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::WatchTest { app, file, paths } => {
            let ecosystem = load(&file)?;
            let matcher = WatchMatcher::new(ecosystem.app(app.as_deref())?)?;
            for path in paths {
                let verdict = if matcher.triggers_restart(&path) {
                    "restart"
                } else {
                    "ignore"
                };
                println!("{verdict}\t{path}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Exec {
            selection,
            clean_env,
            file,
        } => exec(&file, &selection, clean_env).await,
    }
}

fn load(path: &Path) -> color_eyre::Result<Ecosystem> {
    Ecosystem::load(path).wrap_err_with(|| format!("Unable to load `{}`", path.display()))
}

fn load_variants(paths: &[PathBuf]) -> color_eyre::Result<Vec<Variant>> {
    paths
        .iter()
        .map(|path| {
            Variant::load(path).wrap_err_with(|| format!("Unable to load `{}`", path.display()))
        })
        .collect()
}

fn check(policy: Option<&Path>, files: &[PathBuf]) -> color_eyre::Result<ExitCode> {
    let policy = match policy {
        Some(path) => LintPolicy::load(path)
            .wrap_err_with(|| format!("Unable to load lint policy `{}`", path.display()))?,
        None => LintPolicy::default(),
    };

    let mut failed = false;
    for file in files {
        let ecosystem = match Ecosystem::load(file) {
            Ok(ecosystem) => ecosystem,
            Err(err) => {
                let report = color_eyre::Report::new(err);
                let mut chain = report.chain();
                if let Some(err) = chain.next() {
                    println!("{}: {}", file.display(), style(err).red());
                }
                for cause in chain {
                    println!("  caused by: {cause}");
                }
                failed = true;
                continue;
            }
        };

        let findings = lint::lint(&ecosystem, &policy);
        for finding in &findings {
            let line = format!("{}: {finding}", file.display());
            match finding.severity() {
                Severity::Error => println!("{}", style(line).red()),
                Severity::Warning => println!("{}", style(line).yellow()),
            }
        }

        if policy.fails(&findings) {
            failed = true;
        } else {
            println!("{}: {}", file.display(), style("ok").green());
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn exec(file: &Path, selection: &Selection, clean_env: bool) -> color_eyre::Result<ExitCode> {
    let ecosystem = load(file)?;
    let app = ecosystem.app(selection.app.as_deref())?;
    let base_dir = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
        _ => std::env::current_dir().wrap_err("Unable to determine working directory")?,
    };

    let invocation = Invocation::for_app(app, selection.target.as_deref(), &base_dir, clean_env);
    tracing::info!(app = %app.name, target = ?selection.target, program = %invocation.program, "Starting app");

    // Forward SIGINT and SIGTERM to the app's process group.
    let (signal_sender, mut signal_receiver) = mpsc::unbounded_channel();
    for (kind, forwarded) in [
        (SignalKind::interrupt(), Signal::SIGINT),
        (SignalKind::terminate(), Signal::SIGTERM),
    ] {
        let mut stream = signal(kind).wrap_err("Failed to register signal handler")?;
        let sender = signal_sender.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                if sender.send(forwarded).is_err() {
                    break;
                }
            }
        });
    }

    let mut command = Command::run(&invocation)?;
    let control = command.control();

    let exit_status = loop {
        tokio::select! {
            exit_status = command.wait() => break exit_status,
            Some(forwarded) = signal_receiver.recv() => {
                tracing::info!(app = %app.name, signal = ?forwarded, "Forwarding signal");
                if let Err(err) = control.kill(forwarded) {
                    tracing::warn!(?err, "Error forwarding signal");
                }
            }
        }
    };

    match exit_status {
        ExitStatus::Exited(code) => {
            tracing::info!(app = %app.name, %code, "App exited");
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
        ExitStatus::Signaled(signal) => {
            tracing::info!(app = %app.name, %signal, "App killed by signal");
            Ok(ExitCode::from(u8::try_from(128 + signal).unwrap_or(1)))
        }
        ExitStatus::Killed => {
            tracing::warn!(app = %app.name, "App was killed");
            Ok(ExitCode::FAILURE)
        }
    }
}
