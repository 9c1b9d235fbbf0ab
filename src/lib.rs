//! Reads, checks, and launches the deployment descriptors (ecosystem
//! files) that a process supervisor uses to start an application.

#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_debug_implementations,
    nonstandard_style,
    // missing_docs,
    unreachable_pub,
    missing_copy_implementations,
    unused_qualifications,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

use std::path::PathBuf;

pub mod command;
pub mod descriptor;
pub mod dsn;
pub mod format;
pub mod lint;
pub mod variants;

pub use descriptor::{app::AppDescriptor, Ecosystem};

/// Errors produced while loading or acting on a descriptor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Syntax error in `{}`: {error}", path.display())]
    Syntax {
        path: PathBuf,
        error: format::js::SyntaxError,
    },

    #[error("Invalid JSON in `{}`", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid TOML in `{}`", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("`{}` is not a valid ecosystem file", path.display())]
    Schema {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unrecognized descriptor format for `{}` (expected .js, .json, or .toml)", .0.display())]
    UnknownFormat(PathBuf),

    #[error("No app named `{0}` in the descriptor")]
    AppNotFound(String),

    #[error("Descriptor declares {0} apps; choose one by name")]
    AmbiguousApp(usize),

    #[error("Environment variable `{0}` is not set in the descriptor")]
    MissingEnv(String),

    #[error("Variants disagree on `{field}` for app `{app}`")]
    VariantConflict { app: String, field: String },

    #[error("Variant label `{0}` is used more than once")]
    DuplicateVariant(String),

    #[error("No variants were provided")]
    NoVariants,

    #[error("Invalid ignore pattern `{pattern}`")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Invalid lint policy")]
    Policy(#[source] toml::de::Error),

    #[error("Unable to render descriptor: {0}")]
    Render(String),

    #[error("Unable to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
