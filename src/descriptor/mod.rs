//! Ecosystem descriptor model.

use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{format::Format, Error, Result};

use self::app::AppDescriptor;

pub mod app;
pub mod env;
pub mod watch;

/// The single table exported by an ecosystem file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Ecosystem {
    pub apps: Vec<AppDescriptor>,

    /// Top-level keys other than `apps` (such as `deploy`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Ecosystem {
    /// Reads and decodes the descriptor at `path`, choosing the format
    /// from its extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = Format::from_path(path)?;
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;

        Self::parse(&text, format, path)
    }

    /// Decodes descriptor text. `path` is only used for error reporting.
    pub fn parse(text: &str, format: Format, path: &Path) -> Result<Self> {
        let value = format.parse(text, path)?;
        Self::from_value(value).map_err(|source| Error::Schema {
            path: path.to_owned(),
            source,
        })
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let mut ecosystem: Ecosystem = serde_json::from_value(value)?;
        for app in &mut ecosystem.apps {
            app.split_targets()?;
        }
        Ok(ecosystem)
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            String::from("apps"),
            Value::Array(self.apps.iter().map(AppDescriptor::to_value).collect()),
        );
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Looks up an app by name, or returns the only app when no name is
    /// given.
    pub fn app(&self, name: Option<&str>) -> Result<&AppDescriptor> {
        match name {
            Some(name) => self
                .apps
                .iter()
                .find(|app| app.name == name)
                .ok_or_else(|| Error::AppNotFound(name.to_owned())),
            None => match self.apps.as_slice() {
                [app] => Ok(app),
                [] => Err(Error::AppNotFound(String::from("<any>"))),
                apps => Err(Error::AmbiguousApp(apps.len())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::Ecosystem;
    use crate::{format::Format, Error};

    #[test]
    fn selects_apps_by_name() {
        let ecosystem = Ecosystem::from_value(json!({
            "apps": [
                { "name": "api", "script": "api.sh" },
                { "name": "worker", "script": "worker.sh" }
            ]
        }))
        .expect("ecosystem");

        assert_eq!("worker.sh", ecosystem.app(Some("worker")).expect("worker").script);
        assert!(matches!(ecosystem.app(None), Err(Error::AmbiguousApp(2))));
        assert!(matches!(
            ecosystem.app(Some("cron")),
            Err(Error::AppNotFound(name)) if name == "cron"
        ));
    }

    #[test]
    fn keeps_top_level_extras() {
        let ecosystem = Ecosystem::from_value(json!({
            "apps": [],
            "deploy": { "production": { "user": "diary" } }
        }))
        .expect("ecosystem");

        assert_eq!(
            json!({ "apps": [], "deploy": { "production": { "user": "diary" } } }),
            ecosystem.to_value()
        );
    }

    #[test]
    fn rendering_preserves_the_descriptor() {
        let text = indoc! {r#"
            module.exports = {
              apps: [{
                name: "budget-diary",
                script: "run.sh",
                args: "--workers 2",
                watch: ["budgetdiary", "config"],
                ignore_watch: ["build", "dist", "*.pyc"],
                env: { DB_USER: "diary", PORT: 8000 },
                env_production: { DB_HOST: "db:3306" },
                max_memory_restart: "300M",
              }],
            };
        "#};
        let path = Path::new("ecosystem.config.js");
        let ecosystem = Ecosystem::parse(text, Format::Js, path).expect("parse");

        for format in [Format::Js, Format::Json, Format::Toml] {
            let rendered = format.render(&ecosystem).expect("render");
            assert_eq!(
                ecosystem,
                Ecosystem::parse(&rendered, format, path).expect("reparse"),
                "{format:?}"
            );
        }
    }

    #[test]
    fn schema_errors_name_the_file() {
        let error = Ecosystem::parse(
            "module.exports = { apps: [{ script: 'run.sh' }] }",
            Format::Js,
            Path::new("deploy/ecosystem.config.js"),
        )
        .unwrap_err();

        assert_eq!(
            "`deploy/ecosystem.config.js` is not a valid ecosystem file",
            error.to_string()
        );
        assert!(matches!(error, Error::Schema { .. }));
    }
}
