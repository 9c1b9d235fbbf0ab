//! Structural checks for descriptors.

use std::{
    collections::{BTreeSet, HashSet},
    fmt,
    path::Path,
};

use serde::Deserialize;

use crate::{
    descriptor::{env::EnvMap, watch::WatchMatcher},
    AppDescriptor, Ecosystem, Error, Result,
};

/// Expectations that descriptors are checked against. Loaded from TOML;
/// every field is optional and defaults to the budget-diary deployment
/// conventions.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct LintPolicy {
    /// Number of apps each file must declare. `None` skips the check.
    pub expected_apps: Option<usize>,

    pub required_env: Vec<String>,

    /// Exact set of `ignore_watch` globs. `None` skips the check.
    pub ignore_watch: Option<BTreeSet<String>>,

    /// Substrings (matched case-insensitively) that mark an env key as a
    /// secret.
    pub secret_keys: Vec<String>,

    /// Treat warnings as failures.
    pub deny_warnings: bool,
}

impl Default for LintPolicy {
    fn default() -> Self {
        Self {
            expected_apps: Some(1),
            required_env: ["DB_USER", "DB_PASS", "DB_HOST", "DB_NAME"]
                .into_iter()
                .map(String::from)
                .collect(),
            ignore_watch: Some(
                ["build", "dist", "*.pyc"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            secret_keys: ["PASS", "SECRET", "TOKEN"]
                .into_iter()
                .map(String::from)
                .collect(),
            deny_warnings: false,
        }
    }
}

impl LintPolicy {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(Error::Policy)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Returns `true` if `findings` should fail a check run.
    pub fn fails(&self, findings: &[Finding]) -> bool {
        findings.iter().any(|finding| {
            finding.severity() == Severity::Error
                || (self.deny_warnings && finding.severity() == Severity::Warning)
        })
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Lint rules, in the order their findings are reported.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum Rule {
    AppCount,
    DuplicateName,
    EmptyField,
    RequiredEnv,
    EnvNotString,
    IgnoreWatch,
    InvalidGlob,
    UnknownField,
    PlaintextSecret,
}

impl Rule {
    pub fn id(self) -> &'static str {
        match self {
            Rule::AppCount => "app-count",
            Rule::DuplicateName => "duplicate-name",
            Rule::EmptyField => "empty-field",
            Rule::RequiredEnv => "required-env",
            Rule::EnvNotString => "env-not-string",
            Rule::IgnoreWatch => "ignore-watch",
            Rule::InvalidGlob => "invalid-glob",
            Rule::UnknownField => "unknown-field",
            Rule::PlaintextSecret => "plaintext-secret",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Rule::UnknownField | Rule::PlaintextSecret => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    pub rule: Rule,

    /// App the finding is about; `None` for file-level findings.
    pub app: Option<String>,

    pub message: String,
}

impl Finding {
    fn new(rule: Rule, app: Option<&AppDescriptor>, message: impl Into<String>) -> Self {
        Self {
            rule,
            app: app.map(|app| app.name.clone()),
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.rule.severity()
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.severity(), self.rule.id())?;
        if let Some(app) = &self.app {
            write!(f, " {app}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Checks `ecosystem` against `policy`.
pub fn lint(ecosystem: &Ecosystem, policy: &LintPolicy) -> Vec<Finding> {
    let mut findings = Vec::new();

    if let Some(expected) = policy.expected_apps {
        if ecosystem.apps.len() != expected {
            findings.push(Finding::new(
                Rule::AppCount,
                None,
                format!(
                    "expected {expected} app(s), found {}",
                    ecosystem.apps.len()
                ),
            ));
        }
    }

    let mut seen = HashSet::new();
    for app in &ecosystem.apps {
        if !app.name.is_empty() && !seen.insert(app.name.as_str()) {
            findings.push(Finding::new(
                Rule::DuplicateName,
                None,
                format!("app name `{}` is declared more than once", app.name),
            ));
        }
    }

    for app in &ecosystem.apps {
        lint_app(app, policy, &mut findings);
    }

    tracing::debug!(findings = findings.len(), "Lint complete");
    findings
}

fn lint_app(app: &AppDescriptor, policy: &LintPolicy, findings: &mut Vec<Finding>) {
    let this = Some(app);

    if app.name.trim().is_empty() {
        findings.push(Finding::new(Rule::EmptyField, this, "`name` is empty"));
    }
    if app.script.trim().is_empty() {
        findings.push(Finding::new(Rule::EmptyField, this, "`script` is empty"));
    }

    // Apps with targets are only ever launched with one of them applied,
    // so each resolved target must be complete; the base env on its own
    // may hold just the shared keys.
    let resolved: Vec<(Option<&str>, EnvMap)> = if app.targets.is_empty() {
        vec![(None, app.env.clone())]
    } else {
        app.targets
            .keys()
            .map(|target| (Some(target.as_str()), app.resolve_env(Some(target))))
            .collect()
    };
    for (target, env) in &resolved {
        for key in &policy.required_env {
            if !env.contains_key(key) {
                findings.push(Finding::new(
                    Rule::RequiredEnv,
                    this,
                    match target {
                        Some(target) => format!("`{key}` is missing for target `{target}`"),
                        None => format!("`{key}` is missing from `env`"),
                    },
                ));
            }
        }
    }

    let blocks = std::iter::once((String::from("env"), &app.env)).chain(
        app.targets
            .iter()
            .map(|(target, env)| (format!("env_{target}"), env)),
    );
    let blocks: Vec<(String, &EnvMap)> = blocks.collect();

    for (block, env) in &blocks {
        for (key, value) in env.iter() {
            if value.as_str().is_none() {
                findings.push(Finding::new(
                    Rule::EnvNotString,
                    this,
                    format!("`{block}.{key}` is `{value}`, not a string"),
                ));
            }
        }
    }

    if let Some(expected) = &policy.ignore_watch {
        let actual: BTreeSet<String> = app.ignore_watch.iter().cloned().collect();
        if &actual != expected || actual.len() != app.ignore_watch.len() {
            findings.push(Finding::new(
                Rule::IgnoreWatch,
                this,
                format!(
                    "`ignore_watch` is {:?}, expected exactly {:?}",
                    app.ignore_watch, expected
                ),
            ));
        }
    }

    if let Err(Error::InvalidGlob { pattern, source }) = WatchMatcher::new(app) {
        findings.push(Finding::new(
            Rule::InvalidGlob,
            this,
            format!("`{pattern}` is not a valid glob: {source}"),
        ));
    }

    for key in app.extra.keys() {
        findings.push(Finding::new(
            Rule::UnknownField,
            this,
            format!("`{key}` is not a recognized descriptor field"),
        ));
    }

    let secret_markers: Vec<String> = policy
        .secret_keys
        .iter()
        .map(|marker| marker.to_uppercase())
        .collect();
    for (block, env) in &blocks {
        for (key, value) in env.iter() {
            let upper = key.to_uppercase();
            let secret = secret_markers.iter().any(|marker| upper.contains(marker));
            if secret && value.as_str().map_or(false, |s| !s.is_empty()) {
                findings.push(Finding::new(
                    Rule::PlaintextSecret,
                    this,
                    format!("`{block}.{key}` holds a plaintext secret"),
                ));
            }
        }
    }
}
