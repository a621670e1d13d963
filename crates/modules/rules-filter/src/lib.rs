//! Native filters described by YAML rule files.
//!
//! Each rule becomes one filter of the registry, in file order. Reloading
//! swaps the whole set: the new rules are compiled first, so a broken rule
//! file leaves the previous rules active.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use thiserror::Error;
use ulatency_core::{
    ConfigError, FilterConfig, FilterName, FilterRegistry, RegistryError, RuleFileError,
    load_rules_from_dir,
};

mod rule;

pub use rule::UserRule;

pub const MODULE_NAME: &str = "rules-filter";
const DEFAULT_RULES_PATH: &str = "/etc/ulatency/rules";

#[derive(Error, Debug)]
pub enum RulesFilterError {
    #[error(transparent)]
    RuleFile(#[from] RuleFileError),
    #[error("rule '{rule}': invalid {field} pattern")]
    Pattern {
        rule: String,
        field: &'static str,
        #[source]
        error: regex::Error,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub enabled: bool,
    pub rules_path: PathBuf,
}

impl TryFrom<&FilterConfig> for Config {
    type Error = ConfigError;

    fn try_from(config: &FilterConfig) -> Result<Self, Self::Error> {
        let enabled = config.get_or("enabled", true)?;
        let rules_path = config.get_or("rules_path", PathBuf::from(DEFAULT_RULES_PATH))?;

        if enabled && !rules_path.exists() {
            return Err(ConfigError {
                field: "rules_path".to_string(),
                value: rules_path.display().to_string(),
                reason: "directory does not exist".to_string(),
            });
        }

        Ok(Self {
            enabled,
            rules_path,
        })
    }
}

/// Owner of the filters loaded from the rule files.
pub struct RulesFilter {
    registry: FilterRegistry,
    rules_path: PathBuf,
    loaded: Vec<FilterName>,
}

impl RulesFilter {
    pub fn new(registry: FilterRegistry, config: &Config) -> Self {
        Self {
            registry,
            rules_path: config.rules_path.clone(),
            loaded: Vec::new(),
        }
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    /// Names of the filters currently registered by this module.
    pub fn loaded(&self) -> &[FilterName] {
        &self.loaded
    }

    /// Load the rule files, replacing the filters of a previous load.
    /// Returns the number of active rules.
    pub fn reload(&mut self) -> Result<usize, RulesFilterError> {
        let rules_path = self.rules_path.clone();
        self.reload_from(&rules_path)
    }

    /// Like [`RulesFilter::reload`], reading the rules from a new directory.
    /// On error the previous rules and directory are kept.
    pub fn reload_from(&mut self, rules_path: &Path) -> Result<usize, RulesFilterError> {
        let user_rules: Vec<UserRule> = load_rules_from_dir(rules_path)?;
        let filters = user_rules
            .into_iter()
            .map(UserRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        self.check_names(filters.iter().map(|filter| filter.name()))?;

        self.unload();
        self.rules_path = rules_path.to_path_buf();
        for filter in filters {
            let filter = self.registry.register(filter)?;
            self.loaded.push(filter.name().clone());
        }

        log::info!(
            "loaded {} rules from {}",
            self.loaded.len(),
            self.rules_path.display()
        );
        Ok(self.loaded.len())
    }

    /// Every name must be new to the set and either free in the registry or
    /// owned by the rules being replaced.
    fn check_names<'a>(
        &self,
        names: impl Iterator<Item = &'a FilterName>,
    ) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for name in names {
            let foreign = !self.loaded.contains(name) && self.registry.get(name).is_some();
            if !seen.insert(name) || foreign {
                return Err(RegistryError::DuplicateName(name.clone()));
            }
        }
        Ok(())
    }

    /// Remove every filter registered by this module.
    pub fn unload(&mut self) {
        for name in self.loaded.drain(..) {
            if let Err(err) = self.registry.unregister(&name) {
                log::warn!("{err}");
            }
        }
    }
}
