//! Loading of YAML rule files from a directory tree.

use std::{
    fs,
    path::{Path, PathBuf},
};

use glob::glob;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub const RULE_EXTENSION: &str = "yaml";

#[derive(Error, Debug)]
pub enum RuleFileError {
    #[error("Error listing rules: {0}")]
    RuleListing(#[from] glob::PatternError),
    #[error("Error reading rule: {name}")]
    RuleLoading {
        name: String,
        #[source]
        error: std::io::Error,
    },
    #[error("Error parsing rule file: {filename}")]
    RuleParsing {
        filename: String,
        #[source]
        error: serde_yaml::Error,
    },
}

/// A rule file read from disk.
#[derive(Debug, Clone)]
pub struct RuleFile {
    pub path: PathBuf,
    pub body: String,
}

impl RuleFile {
    pub fn from(path: &Path) -> Result<Self, RuleFileError> {
        log::debug!("loading rule {}", path.display());
        let body = fs::read_to_string(path).map_err(|error| RuleFileError::RuleLoading {
            name: path.display().to_string(),
            error,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            body,
        })
    }

    /// Every file contains a list of rules.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<Vec<T>, RuleFileError> {
        parse_rules(&self.body, &self.path.display().to_string())
    }
}

/// Parse a YAML list of rules. `filename` is only used in errors.
pub fn parse_rules<T: DeserializeOwned>(
    body: &str,
    filename: &str,
) -> Result<Vec<T>, RuleFileError> {
    serde_yaml::from_str::<Vec<T>>(body).map_err(|error| RuleFileError::RuleParsing {
        filename: filename.to_string(),
        error,
    })
}

/// Load the rules of every `*.yaml` file under `rules_path`, sorted by path so
/// that registration order doesn't depend on the filesystem.
pub fn load_rules_from_dir<T: DeserializeOwned>(
    rules_path: &Path,
) -> Result<Vec<T>, RuleFileError> {
    let expr = format!("{}/**/*.{}", rules_path.display(), RULE_EXTENSION);
    let mut paths: Vec<PathBuf> = glob(&expr)?.flatten().collect();
    paths.sort();

    let rules = paths
        .iter()
        .map(|path| RuleFile::from(path)?.parse())
        .collect::<Result<Vec<Vec<T>>, RuleFileError>>()?;

    Ok(rules.into_iter().flatten().collect())
}
