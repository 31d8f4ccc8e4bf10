use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while loading configuration or binding options from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot bind section `{section}`: {source}")]
    Bind {
        section: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A hierarchical configuration tree.
///
/// Sections are addressed by `:`-separated paths, so `"Persistence:Counter"`
/// is the `Counter` table inside the `Persistence` table.
///
/// # Examples
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use statehouse::Configuration;
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct Retry {
///     attempts: u32,
///     backoff_ms: u64,
/// }
///
/// let config = Configuration::from_toml_str(
///     r#"
///     [Retry]
///     attempts = 3
///     backoff_ms = 100
///
///     [Retry.Uploads]
///     attempts = 5
///     "#,
/// )
/// .unwrap();
///
/// let retry: Retry = config.bind(&["Retry", "Retry:Uploads"]).unwrap();
/// assert_eq!(retry.attempts, 5);
/// assert_eq!(retry.backoff_ms, 100);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    root: Value,
}

impl Configuration {
    /// An empty configuration; every section lookup misses.
    pub fn empty() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = source.parse()?;
        let root = serde_json::to_value(table)?;
        Ok(Self { root })
    }

    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            root: serde_json::from_str(source)?,
        })
    }

    /// The value at `path`, if every segment exists.
    pub fn section(&self, path: &str) -> Option<&Value> {
        path.split(':')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |node, segment| node.get(segment))
    }

    pub fn has_section(&self, path: &str) -> bool {
        self.section(path).is_some()
    }

    /// Bind `O` by overlaying each existing section, in order, onto `O::default()`.
    ///
    /// Later sections win. Missing sections are skipped; keys the options type
    /// does not know are ignored.
    pub fn bind<O>(&self, sections: &[&str]) -> Result<O, ConfigError>
    where
        O: Default + Serialize + DeserializeOwned,
    {
        let mut merged = serde_json::to_value(O::default())?;
        let mut last = String::new();
        for path in sections {
            if let Some(section) = self.section(path) {
                overlay(&mut merged, section);
                last = (*path).to_string();
            }
        }
        serde_json::from_value(merged).map_err(|source| ConfigError::Bind {
            section: last,
            source,
        })
    }

    pub fn root(&self) -> &Value {
        &self.root
    }
}

/// Deep-merge `patch` into `target`; tables merge key by key, anything else replaces.
fn overlay(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => overlay(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
