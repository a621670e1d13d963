use std::sync::{Arc, PoisonError, RwLock};

use nix::unistd::Pid;
use thiserror::Error;

use crate::filter::{Filter, FilterName};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("filter {0} is already registered")]
    DuplicateName(FilterName),
    #[error("filter {0} is not registered")]
    NotFound(String),
}

/// Ordered set of active filters.
///
/// The registry is a cheap handle: clones share the same set, so a filter action
/// holding a clone can register or unregister filters. The dispatcher works on a
/// copy taken with [`FilterRegistry::active_filters`] at the start of every tick,
/// which makes such changes visible only from the following tick.
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    filters: Arc<RwLock<Vec<Arc<Filter>>>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the active set. A filter with the same name already
    /// registered is left untouched and an error is returned.
    pub fn register(&self, filter: Filter) -> Result<Arc<Filter>, RegistryError> {
        let mut filters = self.filters.write().unwrap_or_else(PoisonError::into_inner);
        if filters.iter().any(|f| f.name() == filter.name()) {
            return Err(RegistryError::DuplicateName(filter.name().clone()));
        }
        log::debug!("registering {} filter {}", filter.kind(), filter.name());
        let filter = Arc::new(filter);
        filters.push(filter.clone());
        Ok(filter)
    }

    /// Remove a filter from the active set, dropping its cached decisions and
    /// releasing its scripting handles.
    ///
    /// A tick already running keeps its own reference to the filter; scripted
    /// filters invoked after this point fail with a stale handle error.
    pub fn unregister(&self, name: &str) -> Result<Arc<Filter>, RegistryError> {
        let filter = {
            let mut filters = self.filters.write().unwrap_or_else(PoisonError::into_inner);
            let position = filters
                .iter()
                .position(|f| &**f.name() == name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            filters.remove(position)
        };
        log::debug!("unregistering {} filter {}", filter.kind(), filter.name());
        filter.release();
        Ok(filter)
    }

    /// Copy of the active set, in registration order.
    pub fn active_filters(&self) -> Vec<Arc<Filter>> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Filter>> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|f| &**f.name() == name)
            .cloned()
    }

    pub fn names(&self) -> Vec<FilterName> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Drop the decisions every filter took for an exited process.
    pub fn evict(&self, pid: Pid) {
        for filter in self.active_filters() {
            if filter.cache().evict(pid) {
                log::trace!("evicted {pid} from {} cache", filter.name());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
