//! Environment-specific copies of the same deployment: comparing them,
//! and folding them into one descriptor with per-target env blocks.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use serde_json::Value;

use crate::{
    descriptor::{app::TARGET_PREFIX, env::EnvMap},
    AppDescriptor, Ecosystem, Error, Result,
};

/// One descriptor file, labelled with the target it deploys to.
#[derive(Clone, Debug, PartialEq)]
pub struct Variant {
    pub label: String,
    pub ecosystem: Ecosystem,
}

impl Variant {
    pub fn new(label: impl Into<String>, ecosystem: Ecosystem) -> Self {
        Self {
            label: label.into(),
            ecosystem,
        }
    }

    /// Loads `path`, deriving the label from the file name.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::new(label_for_path(path), Ecosystem::load(path)?))
    }
}

/// Derives a variant label from a descriptor file name:
/// `ecosystem.production.config.js` is `production`, and a plain
/// `ecosystem.config.js` is `default`.
pub fn label_for_path(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    let mut label = name;
    for ext in [".js", ".cjs", ".mjs", ".json", ".toml"] {
        if let Some(stem) = label.strip_suffix(ext) {
            label = stem;
            break;
        }
    }
    label = label.strip_suffix(".config").unwrap_or(label);
    label = label.strip_prefix("ecosystem").unwrap_or(label);

    let label = label.trim_matches(|c| matches!(c, '.' | '-' | '_'));
    if label.is_empty() {
        String::from("default")
    } else {
        label.to_owned()
    }
}

/// A field whose value is not the same in every variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Drift {
    pub app: String,

    /// Field path, such as `script` or `env.DB_HOST`. `app` when the app
    /// itself is missing from some variants.
    pub field: String,

    /// Value per variant label, rendered as JSON; `None` where the field
    /// is absent.
    pub values: Vec<(String, Option<String>)>,
}

/// Lists every field that differs between `variants`.
pub fn drift(variants: &[Variant]) -> Vec<Drift> {
    let mut drifts = Vec::new();

    for name in app_names(variants) {
        let apps: Vec<(&str, Option<&AppDescriptor>)> = variants
            .iter()
            .map(|variant| (variant.label.as_str(), find_app(variant, &name)))
            .collect();

        if apps.iter().any(|(_, app)| app.is_none()) {
            drifts.push(Drift {
                app: name.clone(),
                field: String::from("app"),
                values: apps
                    .iter()
                    .map(|(label, app)| (label.to_string(), app.map(|_| String::from("present"))))
                    .collect(),
            });
        }

        let fields: Vec<(&str, BTreeMap<String, String>)> = apps
            .iter()
            .filter_map(|(label, app)| app.map(|app| (*label, flatten_fields(app))))
            .collect();
        let keys: BTreeSet<&String> = fields.iter().flat_map(|(_, f)| f.keys()).collect();

        for key in keys {
            let values: Vec<(String, Option<String>)> = fields
                .iter()
                .map(|(label, f)| (label.to_string(), f.get(key).cloned()))
                .collect();
            if values.windows(2).any(|pair| pair[0].1 != pair[1].1) {
                drifts.push(Drift {
                    app: name.clone(),
                    field: key.clone(),
                    values,
                });
            }
        }
    }

    drifts
}

/// Folds `variants` into one descriptor. Settings other than the
/// environment must agree across all variants. Env keys with the same
/// value everywhere go into `env`; the rest go into `env_<label>`, so
/// that resolving the result for a label reproduces that variant's env.
pub fn consolidate(variants: &[Variant]) -> Result<Ecosystem> {
    let first = variants.first().ok_or(Error::NoVariants)?;

    let mut labels = BTreeSet::new();
    for variant in variants {
        if !labels.insert(variant.label.as_str()) {
            return Err(Error::DuplicateVariant(variant.label.clone()));
        }
    }

    let mut ecosystem = Ecosystem {
        apps: Vec::new(),
        extra: first.ecosystem.extra.clone(),
    };
    let first_extra = json_fields(&first.ecosystem.extra);
    for variant in variants {
        if let Some(key) = differing_key(&first_extra, &json_fields(&variant.ecosystem.extra)) {
            return Err(Error::VariantConflict {
                app: String::from("*"),
                field: key,
            });
        }
    }

    for name in app_names(variants) {
        let mut apps = Vec::with_capacity(variants.len());
        for variant in variants {
            let app = find_app(variant, &name).ok_or_else(|| Error::VariantConflict {
                app: name.clone(),
                field: String::from("app"),
            })?;
            apps.push((variant.label.as_str(), app));
        }

        ecosystem.apps.push(consolidate_app(&name, &apps)?);
    }

    tracing::info!(
        variants = variants.len(),
        apps = ecosystem.apps.len(),
        "Consolidated variants"
    );
    Ok(ecosystem)
}

fn consolidate_app(name: &str, apps: &[(&str, &AppDescriptor)]) -> Result<AppDescriptor> {
    let (_, template) = apps[0];

    let settings = |app: &AppDescriptor| -> BTreeMap<String, String> {
        flatten_fields(app)
            .into_iter()
            .filter(|(key, _)| !key.starts_with("env."))
            .collect()
    };
    let template_settings = settings(template);
    for (_, app) in &apps[1..] {
        if let Some(field) = differing_key(&template_settings, &settings(app)) {
            return Err(Error::VariantConflict {
                app: name.to_owned(),
                field,
            });
        }
    }

    let keys: BTreeSet<&String> = apps.iter().flat_map(|(_, app)| app.env.keys()).collect();
    let mut shared = EnvMap::new();
    let mut per_label: BTreeMap<&str, EnvMap> =
        apps.iter().map(|(label, _)| (*label, EnvMap::new())).collect();

    for key in keys {
        let values: Vec<_> = apps.iter().map(|(_, app)| app.env.get(key)).collect();
        let first_value = values[0];
        match first_value {
            Some(value) if values.iter().all(|v| *v == Some(value)) => {
                shared.insert(key.clone(), value.clone());
            }
            _ => {
                for ((label, _), value) in apps.iter().zip(values.into_iter()) {
                    if let Some(value) = value {
                        if let Some(env) = per_label.get_mut(label) {
                            env.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
        }
    }

    let mut app = template.clone();
    app.env = shared;
    for (label, env) in per_label {
        if app.targets.contains_key(label) {
            return Err(Error::VariantConflict {
                app: name.to_owned(),
                field: format!("{TARGET_PREFIX}{label}"),
            });
        }
        app.targets.insert(label.to_owned(), env);
    }

    Ok(app)
}

/// App names across all variants, in first-seen order.
fn app_names(variants: &[Variant]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for app in variants.iter().flat_map(|variant| &variant.ecosystem.apps) {
        if !names.contains(&app.name) {
            names.push(app.name.clone());
        }
    }
    names
}

fn find_app<'a>(variant: &'a Variant, name: &str) -> Option<&'a AppDescriptor> {
    variant.ecosystem.apps.iter().find(|app| app.name == name)
}

/// Flattens an app into `field -> JSON` pairs, splitting env blocks into
/// one entry per key.
fn flatten_fields(app: &AppDescriptor) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    if let Value::Object(map) = app.to_value() {
        for (key, value) in map {
            let is_env = key == "env" || key.starts_with(TARGET_PREFIX);
            match value {
                Value::Object(env) if is_env => {
                    for (env_key, env_value) in env {
                        fields.insert(format!("{key}.{env_key}"), env_value.to_string());
                    }
                }
                _ if key == "name" => {}
                value => {
                    fields.insert(key, value.to_string());
                }
            }
        }
    }
    fields
}

/// First key whose value differs between two maps.
fn differing_key(a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> Option<String> {
    a.keys()
        .chain(b.keys())
        .find(|key| a.get(*key) != b.get(*key))
        .cloned()
}

fn json_fields(map: &serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(key, value)| (key.clone(), value.to_string()))
        .collect()
}
