//! Descriptor file formats.

use std::path::Path;

use serde_json::Value;

use crate::{Ecosystem, Error, Result};

pub mod js;
pub mod render;

/// On-disk representation of an ecosystem file.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Format {
    /// `module.exports = { apps: [...] }`
    Js,
    Json,
    Toml,
}

impl Format {
    /// Picks the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("js" | "cjs" | "mjs") => Ok(Self::Js),
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            _ => Err(Error::UnknownFormat(path.to_owned())),
        }
    }

    /// Parses `text` into an untyped value. `path` is only used for
    /// error reporting.
    pub fn parse(self, text: &str, path: &Path) -> Result<Value> {
        match self {
            Self::Js => js::parse(text).map_err(|error| Error::Syntax {
                path: path.to_owned(),
                error,
            }),
            Self::Json => serde_json::from_str(text).map_err(|source| Error::Json {
                path: path.to_owned(),
                source,
            }),
            Self::Toml => {
                let value: toml::Value = toml::from_str(text).map_err(|source| Error::Toml {
                    path: path.to_owned(),
                    source,
                })?;
                serde_json::to_value(value).map_err(|source| Error::Json {
                    path: path.to_owned(),
                    source,
                })
            }
        }
    }

    /// Renders the ecosystem in this format.
    pub fn render(self, ecosystem: &Ecosystem) -> Result<String> {
        let value = ecosystem.to_value();
        match self {
            Self::Js => Ok(render::render_module(&value)),
            Self::Json => serde_json::to_string_pretty(&value)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(|err| Error::Render(err.to_string())),
            Self::Toml => toml::Value::try_from(value)
                .and_then(|value| toml::to_string_pretty(&value))
                .map_err(|err| Error::Render(err.to_string())),
        }
    }
}
