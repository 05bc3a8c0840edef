// ABOUTME: Secret config fields that may be read from environment variables.
// ABOUTME: Holds SecretValue and the serde adapters that resolve secrets while a config loads.

use crate::error::{MissingEnvVarSnafu, Result};
use serde::{Deserialize, Deserializer};
use snafu::OptionExt;
use std::collections::HashMap;
use std::fmt;

/// A secret written inline, or `{ env: NAME, default: ... }` to read it from
/// the environment when the config is loaded.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SecretValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::Literal(_) => f.write_str("Literal(<redacted>)"),
            SecretValue::FromEnv { var, default } => f
                .debug_struct("FromEnv")
                .field("var", var)
                .field("has_default", &default.is_some())
                .finish(),
        }
    }
}

impl SecretValue {
    /// The secret text. An unset or non-UTF-8 variable falls back to `default`.
    pub fn resolve(&self) -> Result<String> {
        let (var, default) = match self {
            SecretValue::Literal(value) => return Ok(value.clone()),
            SecretValue::FromEnv { var, default } => (var, default),
        };
        std::env::var(var)
            .ok()
            .or_else(|| default.clone())
            .context(MissingEnvVarSnafu { var })
    }
}

pub fn resolve_secret_map(map: &HashMap<String, SecretValue>) -> Result<HashMap<String, String>> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), value.resolve()?)))
        .collect()
}

pub(super) fn deserialize_secret_opt<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<SecretValue>::deserialize(deserializer)?
        .map(|value| value.resolve().map_err(serde::de::Error::custom))
        .transpose()
}

pub(super) fn deserialize_secret_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<SecretValue>::deserialize(deserializer)?
        .iter()
        .map(|value| value.resolve().map_err(serde::de::Error::custom))
        .collect()
}

pub(super) fn deserialize_secret_map<'de, D>(
    deserializer: D,
) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = HashMap::<String, SecretValue>::deserialize(deserializer)?;
    resolve_secret_map(&map).map_err(serde::de::Error::custom)
}
