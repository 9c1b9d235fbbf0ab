//! File-watch configuration, and the predicate that decides whether a
//! changed file should restart the app.

use globset::{GlobBuilder, GlobMatcher};
use serde::Deserialize;
use serde_json::Value;

use crate::{AppDescriptor, Error, Result};

/// What the supervisor watches for changes.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum WatchConfig {
    /// `true` watches the whole app root, `false` disables watching.
    Enabled(bool),

    Path(String),

    Paths(Vec<String>),
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig::Enabled(false)
    }
}

impl WatchConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, WatchConfig::Enabled(false))
    }

    pub fn to_value(&self) -> Value {
        match self {
            WatchConfig::Enabled(b) => Value::Bool(*b),
            WatchConfig::Path(path) => Value::String(path.clone()),
            WatchConfig::Paths(paths) => {
                Value::Array(paths.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

#[derive(Clone, Debug)]
enum Scope {
    Disabled,
    Everything,
    Roots(Vec<String>),
}

#[derive(Clone, Debug)]
struct IgnorePattern {
    matcher: GlobMatcher,

    /// Patterns containing `/` are matched against (a prefix of) the
    /// whole path, others against each path component.
    whole_path: bool,
}

impl IgnorePattern {
    fn new(pattern: &str) -> Result<Self> {
        let trimmed = normalize(pattern);
        let matcher = GlobBuilder::new(&trimmed)
            .literal_separator(true)
            .build()
            .map(|glob| glob.compile_matcher())
            .map_err(|source| Error::InvalidGlob {
                pattern: pattern.to_owned(),
                source,
            })?;

        Ok(Self {
            matcher,
            whole_path: trimmed.contains('/'),
        })
    }

    fn matches(&self, components: &[&str]) -> bool {
        if self.whole_path {
            (1..=components.len()).any(|n| self.matcher.is_match(components[..n].join("/")))
        } else {
            components.iter().any(|c| self.matcher.is_match(c))
        }
    }
}

/// Compiled form of an app's `watch`/`ignore_watch` settings.
#[derive(Clone, Debug)]
pub struct WatchMatcher {
    scope: Scope,
    ignore: Vec<IgnorePattern>,
}

impl WatchMatcher {
    pub fn new(app: &AppDescriptor) -> Result<Self> {
        let roots: Vec<&str> = match &app.watch {
            WatchConfig::Enabled(false) => Vec::new(),
            WatchConfig::Enabled(true) => vec![""],
            WatchConfig::Path(path) => vec![path.as_str()],
            WatchConfig::Paths(paths) => paths.iter().map(String::as_str).collect(),
        };

        let roots: Vec<String> = roots.into_iter().map(normalize).collect();
        let scope = if roots.is_empty() {
            Scope::Disabled
        } else if roots.iter().any(String::is_empty) {
            Scope::Everything
        } else {
            Scope::Roots(roots)
        };

        let ignore = app
            .ignore_watch
            .iter()
            .map(|pattern| IgnorePattern::new(pattern))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { scope, ignore })
    }

    /// Returns `true` if a change to `path` (relative to the app root)
    /// should restart the app.
    pub fn triggers_restart(&self, path: &str) -> bool {
        let path = normalize(path);
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return false;
        }

        let watched = match &self.scope {
            Scope::Disabled => false,
            Scope::Everything => true,
            Scope::Roots(roots) => roots
                .iter()
                .any(|root| path == *root || path.starts_with(&format!("{root}/"))),
        };

        watched && !self.ignore.iter().any(|pattern| pattern.matches(&components))
    }
}

/// Strips `./` prefixes and trailing slashes.
fn normalize(path: &str) -> String {
    let mut path = path.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    if path == "." {
        path = "";
    }
    path.trim_start_matches('/').trim_end_matches('/').to_owned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{WatchConfig, WatchMatcher};
    use crate::{AppDescriptor, Error};

    fn app(watch: serde_json::Value, ignore: &[&str]) -> AppDescriptor {
        serde_json::from_value(json!({
            "name": "budget-diary",
            "script": "run.sh",
            "watch": watch,
            "ignore_watch": ignore,
        }))
        .expect("Failed to decode test app")
    }

    #[test]
    fn decodes_every_watch_form() {
        assert_eq!(WatchConfig::Enabled(true), app(json!(true), &[]).watch);
        assert_eq!(
            WatchConfig::Path(String::from("budgetdiary/")),
            app(json!("budgetdiary/"), &[]).watch
        );
        assert_eq!(
            WatchConfig::Paths(vec![String::from("a"), String::from("b")]),
            app(json!(["a", "b"]), &[]).watch
        );
        assert!(!app(json!(false), &[]).watch.is_enabled());
    }

    #[test]
    fn supports_full_glob_syntax() {
        let matcher = WatchMatcher::new(&app(
            json!("budgetdiary/"),
            &["*.{pyc,pyo}", "file?.[!a-c]", "**/cache", "logs/**"],
        ))
        .expect("matcher");

        assert!(!matcher.triggers_restart("budgetdiary/x.pyc"));
        assert!(!matcher.triggers_restart("budgetdiary/model/x.pyo"));
        assert!(matcher.triggers_restart("budgetdiary/x.py"));
        assert!(!matcher.triggers_restart("budgetdiary/file1.d"));
        assert!(matcher.triggers_restart("budgetdiary/file1.a"));
        assert!(!matcher.triggers_restart("budgetdiary/route/cache/index.json"));
    }

    #[test]
    fn single_star_stays_within_a_segment() {
        let matcher = WatchMatcher::new(&app(json!(true), &["budgetdiary/*.py"])).expect("matcher");

        assert!(!matcher.triggers_restart("budgetdiary/app.py"));
        assert!(matcher.triggers_restart("budgetdiary/route/User.py"));
    }

    #[test]
    fn watched_source_changes_restart() {
        let matcher = WatchMatcher::new(&app(json!("budgetdiary/"), &["build", "dist", "*.pyc"]))
            .expect("matcher");

        assert!(matcher.triggers_restart("budgetdiary/route/User.py"));
        assert!(matcher.triggers_restart("./budgetdiary/__init__.py"));
        assert!(!matcher.triggers_restart("budgetdiary/model/database.pyc"));
        assert!(!matcher.triggers_restart("budgetdiary/build/lib/app.py"));
        assert!(!matcher.triggers_restart("budgetdiary/dist"));
        assert!(!matcher.triggers_restart("README.md"));
        assert!(!matcher.triggers_restart("budgetdiary-old/app.py"));
        assert!(!matcher.triggers_restart(""));
    }

    #[test]
    fn path_patterns_match_from_the_root() {
        let matcher = WatchMatcher::new(&app(json!(true), &["budgetdiary/model"]))
            .expect("matcher");

        assert!(!matcher.triggers_restart("budgetdiary/model/database.py"));
        assert!(matcher.triggers_restart("budgetdiary/route/model.py"));
        assert!(matcher.triggers_restart("other/budgetdiary/model/x.py"));
    }

    #[test]
    fn disabled_watch_never_restarts() {
        let matcher = WatchMatcher::new(&app(json!(false), &[])).expect("matcher");
        assert!(!matcher.triggers_restart("budgetdiary/route/User.py"));

        let matcher = WatchMatcher::new(&app(json!("."), &[])).expect("matcher");
        assert!(matcher.triggers_restart("anything/at/all.py"));
    }

    #[test]
    fn invalid_patterns_are_reported() {
        let error = WatchMatcher::new(&app(json!(true), &["[z-a]"])).unwrap_err();
        assert!(matches!(error, Error::InvalidGlob { pattern, .. } if pattern == "[z-a]"));
    }
}
