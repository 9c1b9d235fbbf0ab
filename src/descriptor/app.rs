//! App (deployment descriptor) configuration.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    env::{env_to_value, EnvMap},
    watch::WatchConfig,
};

/// Prefix of the per-target environment blocks (`env_production`, ...).
pub const TARGET_PREFIX: &str = "env_";

/// Launch parameters for a single managed process.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AppDescriptor {
    pub name: String,

    /// Entry point, relative to `cwd`.
    pub script: String,

    #[serde(default)]
    pub cwd: Option<String>,

    #[serde(default)]
    pub interpreter: Option<String>,

    #[serde(default)]
    pub args: Option<ArgsConfig>,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub ignore_watch: Vec<String>,

    #[serde(default)]
    pub env: EnvMap,

    /// `env_<target>` blocks, keyed by target name.
    #[serde(skip)]
    pub targets: BTreeMap<String, EnvMap>,

    /// Keys this crate does not interpret. They are kept so that
    /// rendering a descriptor does not lose them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppDescriptor {
    /// Moves the `env_<target>` blocks out of `extra`.
    pub(crate) fn split_targets(&mut self) -> Result<(), serde_json::Error> {
        let mut extra = Map::new();
        for (key, value) in std::mem::take(&mut self.extra) {
            match key.strip_prefix(TARGET_PREFIX) {
                Some(target) if !target.is_empty() => {
                    let env: EnvMap = serde_json::from_value(value)?;
                    self.targets.insert(target.to_owned(), env);
                }
                _ => {
                    extra.insert(key, value);
                }
            }
        }
        self.extra = extra;
        Ok(())
    }

    /// Returns the environment the app runs with for `target`: the base
    /// `env`, overlaid with `env_<target>` if the app declares it.
    pub fn resolve_env(&self, target: Option<&str>) -> EnvMap {
        let mut env = self.env.clone();
        if let Some(overrides) = target.and_then(|target| self.targets.get(target)) {
            env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        env
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(String::from("name"), Value::String(self.name.clone()));
        map.insert(String::from("script"), Value::String(self.script.clone()));
        if let Some(cwd) = &self.cwd {
            map.insert(String::from("cwd"), Value::String(cwd.clone()));
        }
        if let Some(interpreter) = &self.interpreter {
            map.insert(
                String::from("interpreter"),
                Value::String(interpreter.clone()),
            );
        }
        if let Some(args) = &self.args {
            map.insert(String::from("args"), args.to_value());
        }
        map.insert(String::from("watch"), self.watch.to_value());
        map.insert(
            String::from("ignore_watch"),
            Value::Array(
                self.ignore_watch
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        map.insert(String::from("env"), env_to_value(&self.env));
        for (target, env) in &self.targets {
            map.insert(format!("{TARGET_PREFIX}{target}"), env_to_value(env));
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// Arguments passed to the script, given either as one
/// whitespace-separated string or as a list.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ArgsConfig {
    Line(String),

    List(Vec<String>),
}

impl ArgsConfig {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            ArgsConfig::Line(line) => line.split_whitespace().map(|s| s.to_owned()).collect(),
            ArgsConfig::List(args) => args.clone(),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            ArgsConfig::Line(line) => Value::String(line.clone()),
            ArgsConfig::List(args) => Value::Array(args.iter().cloned().map(Value::String).collect()),
        }
    }
}
