use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulatency_core::{Filter, FilterRegistry, RegistryError, RuleFileError, load_rules_from_dir};

use crate::{
    binding::{ScriptFilter, ScriptHandles},
    engine::{ScriptEngine, ScriptError, ScriptRef, SharedEngine},
};

/// Declaration of a scripted filter: names of the script globals to bind and
/// optional native pre-filters.
///
/// ```yaml
/// - name: stress
///   match: stress_match
///   action: stress_action
///   data: stress_config
///   basename: ^stress$
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptFilterDescriptor {
    pub name: String,
    #[serde(rename = "match")]
    pub match_fn: String,
    #[serde(rename = "action")]
    pub action_fn: String,
    pub data: Option<String>,
    pub cmdline: Option<String>,
    pub basename: Option<String>,
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error(transparent)]
    RuleFile(#[from] RuleFileError),
    #[error("filter '{name}': binding '{global}' failed")]
    Binding {
        name: String,
        global: String,
        #[source]
        error: ScriptError,
    },
    #[error("filter '{name}': invalid {field} pattern")]
    Pattern {
        name: String,
        field: &'static str,
        #[source]
        error: regex::Error,
    },
    #[error("filter '{name}': scripting engine unavailable")]
    Engine {
        name: String,
        #[source]
        error: ScriptError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ScriptFilterDescriptor {
    /// Resolve the script globals and build the filter. References taken
    /// before a failure are released.
    ///
    /// Fails with [`LoaderError::Engine`] when called from inside a script
    /// call, as the engine is busy running it.
    pub fn build<E: ScriptEngine + 'static>(
        &self,
        engine: &SharedEngine<E>,
    ) -> Result<Filter, LoaderError> {
        let cmdline = self.pattern("cmdline", self.cmdline.as_deref())?;
        let basename = self.pattern("basename", self.basename.as_deref())?;
        let handles = engine
            .try_with(|engine| self.bind(engine))
            .map_err(|error| LoaderError::Engine {
                name: self.name.clone(),
                error,
            })??;

        let mut rule = ScriptFilter::new(engine.clone(), handles);
        if let Some(cmdline) = cmdline {
            rule = rule.cmdline(cmdline);
        }
        if let Some(basename) = basename {
            rule = rule.basename(basename);
        }
        Ok(Filter::new(self.name.clone(), rule))
    }

    fn pattern(
        &self,
        field: &'static str,
        pattern: Option<&str>,
    ) -> Result<Option<Regex>, LoaderError> {
        pattern
            .map(Regex::new)
            .transpose()
            .map_err(|error| LoaderError::Pattern {
                name: self.name.clone(),
                field,
                error,
            })
    }

    fn bind<E: ScriptEngine>(&self, engine: &mut E) -> Result<ScriptHandles, LoaderError> {
        let mut taken: Vec<ScriptRef> = Vec::with_capacity(3);
        let globals = [Some(&self.match_fn), Some(&self.action_fn), self.data.as_ref()];
        for global in globals.into_iter().flatten() {
            match engine.reference(global) {
                Ok(reference) => taken.push(reference),
                Err(error) => {
                    for reference in taken {
                        engine.release(reference);
                    }
                    return Err(LoaderError::Binding {
                        name: self.name.clone(),
                        global: global.clone(),
                        error,
                    });
                }
            }
        }
        Ok(ScriptHandles {
            match_fn: taken[0],
            action_fn: taken[1],
            data: taken.get(2).copied(),
        })
    }
}

/// Read every descriptor under `rules_path`.
pub fn load_descriptors(rules_path: &Path) -> Result<Vec<ScriptFilterDescriptor>, LoaderError> {
    Ok(load_rules_from_dir(rules_path)?)
}

/// Build and register every descriptor, in order. Stops at the first failure:
/// filters registered before it stay in the registry.
pub fn register_all<E: ScriptEngine + 'static>(
    registry: &FilterRegistry,
    engine: &SharedEngine<E>,
    descriptors: &[ScriptFilterDescriptor],
) -> Result<usize, LoaderError> {
    for descriptor in descriptors {
        let filter = descriptor.build(engine)?;
        registry.register(filter)?;
        log::debug!("registered scripted filter {}", descriptor.name);
    }
    Ok(descriptors.len())
}
