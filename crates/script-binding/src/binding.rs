use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use regex::Regex;
use ulatency_core::{
    ActionOutcome, FilterError, FilterKind, FilterRule, MatchOutcome, ProcessSnapshot,
};

use crate::engine::{ScriptEngine, ScriptError, ScriptRef, ScriptValue, SharedEngine};

/// Engine references owned by one scripted filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptHandles {
    pub match_fn: ScriptRef,
    pub action_fn: ScriptRef,
    pub data: Option<ScriptRef>,
}

impl ScriptHandles {
    fn references(self) -> impl Iterator<Item = ScriptRef> {
        [Some(self.match_fn), Some(self.action_fn), self.data]
            .into_iter()
            .flatten()
    }
}

/// Filter whose match and action functions live in the scripting engine.
///
/// Optional command line and basename patterns are checked natively first, so
/// most processes are rejected without entering the engine.
pub struct ScriptFilter<E: ScriptEngine> {
    engine: SharedEngine<E>,
    handles: Mutex<Option<ScriptHandles>>,
    cmdline: Option<Regex>,
    basename: Option<Regex>,
}

impl<E: ScriptEngine> ScriptFilter<E> {
    /// Take ownership of `handles`: they are released when the filter is
    /// unregistered or dropped.
    pub fn new(engine: SharedEngine<E>, handles: ScriptHandles) -> Self {
        Self {
            engine,
            handles: Mutex::new(Some(handles)),
            cmdline: None,
            basename: None,
        }
    }

    pub fn cmdline(mut self, pattern: Regex) -> Self {
        self.cmdline = Some(pattern);
        self
    }

    pub fn basename(mut self, pattern: Regex) -> Self {
        self.basename = Some(pattern);
        self
    }

    pub fn is_released(&self) -> bool {
        self.lock_handles().is_none()
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Option<ScriptHandles>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prefilter(&self, process: &ProcessSnapshot) -> bool {
        if let Some(cmdline) = &self.cmdline {
            if !cmdline.is_match(process.cmdline()) {
                return false;
            }
        }
        if let Some(basename) = &self.basename {
            if !basename.is_match(process.basename()) {
                return false;
            }
        }
        true
    }

    fn invoke(
        &self,
        pick: impl FnOnce(&ScriptHandles) -> ScriptRef,
        process: &ProcessSnapshot,
    ) -> Result<ScriptValue, FilterError> {
        let handles = (*self.lock_handles()).ok_or(FilterError::StaleHandle)?;
        let function = pick(&handles);
        self.engine
            .try_with(|engine| engine.invoke(function, handles.data, process))
            .and_then(|result| result)
            .map_err(|err| call_error(err, self.is_released()))
    }
}

impl<E: ScriptEngine> FilterRule for ScriptFilter<E> {
    fn kind(&self) -> FilterKind {
        FilterKind::Scripted
    }

    fn check(&self, process: &ProcessSnapshot) -> Result<MatchOutcome, FilterError> {
        if !self.prefilter(process) {
            return Ok(MatchOutcome::NoMatch);
        }
        self.invoke(|h| h.match_fn, process).and_then(match_outcome)
    }

    fn action(&self, process: &ProcessSnapshot) -> Result<ActionOutcome, FilterError> {
        self.invoke(|h| h.action_fn, process).and_then(action_outcome)
    }

    fn release(&self) {
        let handles = self.lock_handles().take();
        if let Some(handles) = handles {
            self.engine.release(handles.references());
        }
    }
}

impl<E: ScriptEngine> Drop for ScriptFilter<E> {
    fn drop(&mut self) {
        FilterRule::release(self);
    }
}

/// A reference the engine no longer knows, on a filter released while the
/// call was being set up, is a stale handle like any call after the release.
fn call_error(err: ScriptError, released: bool) -> FilterError {
    match err {
        ScriptError::InvalidReference(_) if released => FilterError::StaleHandle,
        err => FilterError::Script(err.to_string()),
    }
}

/// `nil`, `false` and `0` don't match, `true` and positive integers match,
/// negative integers stop the scan of the process.
pub fn match_outcome(value: ScriptValue) -> Result<MatchOutcome, FilterError> {
    Ok(match value {
        ScriptValue::Nil | ScriptValue::Boolean(false) | ScriptValue::Integer(0) => {
            MatchOutcome::NoMatch
        }
        ScriptValue::Boolean(true) => MatchOutcome::Match,
        ScriptValue::Integer(i) if i > 0 => MatchOutcome::Match,
        ScriptValue::Integer(_) => MatchOutcome::StopAll,
    })
}

/// `nil` and `false` cache nothing, a positive integer is a timeout in
/// seconds, `0` and negative integers skip the process forever.
pub fn action_outcome(value: ScriptValue) -> Result<ActionOutcome, FilterError> {
    match value {
        ScriptValue::Nil | ScriptValue::Boolean(false) => Ok(ActionOutcome::NoCache),
        ScriptValue::Integer(i) if i > 0 => {
            Ok(ActionOutcome::SkipFor(Duration::from_secs(i as u64)))
        }
        ScriptValue::Integer(_) => Ok(ActionOutcome::SkipForever),
        value @ ScriptValue::Boolean(true) => Err(FilterError::InvalidReturn(value.to_string())),
    }
}
