//! Environment maps.

use std::{collections::BTreeMap, fmt};

use serde::Deserialize;
use serde_json::Value;

/// Value of a single environment variable.
///
/// Descriptors are expected to hold strings, but the loader accepts
/// numbers and booleans too (the supervisor stringifies them) so that
/// lint can point at them instead of refusing the whole file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    String(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl EnvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Number(n) => Value::Number(n.clone()),
            Self::Bool(b) => Value::Bool(*b),
        }
    }
}

/// Formats the value the way the launched process sees it.
impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for EnvValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

pub type EnvMap = BTreeMap<String, EnvValue>;

pub(crate) fn env_to_value(env: &EnvMap) -> Value {
    Value::Object(
        env.iter()
            .map(|(key, value)| (key.clone(), value.to_value()))
            .collect(),
    )
}
