//! Database connection URL, assembled from the `DB_*` variables a
//! descriptor hands to the application.

use crate::{descriptor::env::EnvMap, Error, Result};

pub const DEFAULT_SCHEME: &str = "mysql";

pub const DB_USER: &str = "DB_USER";
pub const DB_PASS: &str = "DB_PASS";
pub const DB_HOST: &str = "DB_HOST";
pub const DB_NAME: &str = "DB_NAME";

/// Builds `{scheme}://{user}:{password}@{host}/{name}`. The password is
/// percent-encoded; the host keeps any `:port` suffix.
pub fn database_url(env: &EnvMap, scheme: &str) -> Result<String> {
    let get = |key: &str| {
        env.get(key)
            .map(|value| value.to_string())
            .ok_or_else(|| Error::MissingEnv(key.to_owned()))
    };

    let user = get(DB_USER)?;
    let password = get(DB_PASS)?;
    let host = get(DB_HOST)?;
    let name = get(DB_NAME)?;

    Ok(format!(
        "{scheme}://{user}:{}@{host}/{name}",
        urlencoding::encode(&password)
    ))
}
