use std::{
    collections::HashMap,
    fs::{self, File},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail, ensure};
use ulatency_core::FilterConfig;

const DEFAULT_CONFIG_FILE: &str = "/etc/ulatency/ulatency.ini";

/// Section holding the settings of the scan loop.
pub const GENERAL_CONFIG: &str = "ulatency";

const DEFAULT_INTERVAL_MS: u64 = 5000;
const DEFAULT_SLOW_CALL_MS: u64 = 100;

/// Daemon configuration, one [`FilterConfig`] per section.
///
/// It is backed by an `INI` file which is parsed on creation and on
/// [`UlatencyConfig::reload`].
#[derive(Debug, Clone)]
pub struct UlatencyConfig {
    config_file: PathBuf,
    sections: HashMap<String, FilterConfig>,
}

impl UlatencyConfig {
    /// Construct a new [`UlatencyConfig`] using the default file, created
    /// empty if missing.
    pub fn new() -> Result<Self> {
        let config_file = PathBuf::from(DEFAULT_CONFIG_FILE);
        if !config_file.exists() {
            if let Some(prefix) = config_file.parent() {
                fs::create_dir_all(prefix)
                    .with_context(|| format!("Error creating {}", prefix.display()))?;
            }
            File::create(&config_file)
                .with_context(|| format!("Error creating {}", config_file.display()))?;
        }
        Self::from_config_file(config_file)
    }

    /// Construct a new [`UlatencyConfig`] using a custom file.
    pub fn with_custom_file(config_file: &str) -> Result<Self> {
        let config_file = PathBuf::from(config_file);
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        Self::from_config_file(config_file)
    }

    fn from_config_file(config_file: PathBuf) -> Result<Self> {
        let sections = load_sections(&config_file)?;
        Ok(Self {
            config_file,
            sections,
        })
    }

    /// Parse the file again. On error the current configuration is kept.
    pub fn reload(&mut self) -> Result<()> {
        self.sections = load_sections(&self.config_file)?;
        Ok(())
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Get the configuration of a section, empty if missing.
    pub fn section(&self, name: &str) -> FilterConfig {
        self.sections.get(name).cloned().unwrap_or_default()
    }

    pub fn general(&self) -> Result<GeneralConfig> {
        GeneralConfig::try_from(&self.section(GENERAL_CONFIG))
    }
}

fn load_sections(config_file: &Path) -> Result<HashMap<String, FilterConfig>> {
    let conf = ini::Ini::load_from_file(config_file)
        .with_context(|| format!("Error loading configuration from {config_file:?}"))?;

    let mut sections: HashMap<String, FilterConfig> = HashMap::new();
    for (section, prop) in &conf {
        if let Some(section) = section {
            let config = sections.entry(section.to_string()).or_default();
            for (key, value) in prop.iter() {
                log::debug!("{}.{}={}", section, key, value);
                config.set(key, value);
            }
        }
    }
    Ok(sections)
}

/// Settings of the scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneralConfig {
    /// Time between two scan ticks.
    pub interval: Duration,
    /// Filter calls taking longer than this are reported.
    pub slow_call: Duration,
}

impl TryFrom<&FilterConfig> for GeneralConfig {
    type Error = anyhow::Error;

    fn try_from(config: &FilterConfig) -> Result<Self> {
        let interval_ms = config.get_or("interval_ms", DEFAULT_INTERVAL_MS)?;
        let slow_call_ms = config.get_or("slow_call_ms", DEFAULT_SLOW_CALL_MS)?;
        ensure!(interval_ms > 0, "'interval_ms' must be greater than zero");

        Ok(Self {
            interval: Duration::from_millis(interval_ms),
            slow_call: Duration::from_millis(slow_call_ms),
        })
    }
}
