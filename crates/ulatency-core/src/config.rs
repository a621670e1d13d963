use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use thiserror::Error;

/// Settings of one configuration section, as raw strings.
///
/// Values are parsed on access with [`FromStr`], so each consumer decides the
/// type of its own keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    values: BTreeMap<String, String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid value '{value}' for '{field}': {reason}")]
pub struct ConfigError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl FilterConfig {
    /// Set `key`, replacing a previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Parse `key`, `None` when the section doesn't set it.
    pub fn get<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };
        value.trim().parse().map(Some).map_err(|err: T::Err| ConfigError {
            field: key.to_string(),
            value: value.clone(),
            reason: err.to_string(),
        })
    }

    /// Parse `key`, falling back to `default` when it is not set.
    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.get(key)?.unwrap_or(default))
    }
}

impl<K, V> FromIterator<(K, V)> for FilterConfig
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = Self::default();
        for (key, value) in iter {
            config.set(key, value);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn typed_values() {
        let config: FilterConfig = [("interval_ms", " 250"), ("enabled", "false")]
            .into_iter()
            .collect();
        assert_eq!(config.get::<u64>("interval_ms"), Ok(Some(250)));
        assert_eq!(config.get::<bool>("enabled"), Ok(Some(false)));
        assert_eq!(config.get::<bool>("missing"), Ok(None));
        assert_eq!(
            config.get_or("rules_path", PathBuf::from("/etc/ulatency/rules")),
            Ok(PathBuf::from("/etc/ulatency/rules"))
        );
    }

    #[test]
    fn invalid_value_names_the_field() {
        let mut config = FilterConfig::default();
        config.set("interval_ms", "soon");
        let err = config.get_or::<u64>("interval_ms", 5).unwrap_err();
        assert_eq!(err.field, "interval_ms");
        assert_eq!(err.value, "soon");
        assert!(err.to_string().starts_with("invalid value 'soon' for 'interval_ms'"));
    }

    #[test]
    fn later_value_wins() {
        let config: FilterConfig = [("enabled", "true"), ("enabled", "false")]
            .into_iter()
            .collect();
        assert_eq!(config.get_or("enabled", true), Ok(false));
    }
}
