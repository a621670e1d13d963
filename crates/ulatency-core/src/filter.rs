use std::{
    any::Any,
    borrow::Cow,
    fmt,
    ops::Deref,
    panic::{self, AssertUnwindSafe},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use strum::{Display, EnumString};
use thiserror::Error;

use crate::{cache::DecisionCache, snapshot::ProcessSnapshot};

/// Result of a filter match function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Move on to the next filter, nothing is cached.
    NoMatch,
    /// Run the filter action.
    Match,
    /// Don't consult any further filter for this process during the current tick.
    StopAll,
}

impl From<bool> for MatchOutcome {
    fn from(matched: bool) -> Self {
        if matched {
            MatchOutcome::Match
        } else {
            MatchOutcome::NoMatch
        }
    }
}

/// Result of a filter action, telling the dispatcher how long the filter can
/// skip the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Evaluate the process again on the next tick.
    NoCache,
    /// Skip the process until the given time has passed.
    SkipFor(Duration),
    /// Never evaluate this process again with this filter.
    SkipForever,
}

impl ActionOutcome {
    /// Skip for `timeout`, a zero timeout meaning forever.
    pub fn after(timeout: Duration) -> Self {
        if timeout.is_zero() {
            ActionOutcome::SkipForever
        } else {
            ActionOutcome::SkipFor(timeout)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FilterKind {
    Native,
    Scripted,
}

/// Failure of a single match or action invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("{0}")]
    Failed(String),
    #[error("panicked: {0}")]
    Panicked(String),
    #[error("scripting engine error: {0}")]
    Script(String),
    #[error("unexpected return value {0}")]
    InvalidReturn(String),
    #[error("scripting handles already released")]
    StaleHandle,
}

impl FilterError {
    pub fn failed(reason: impl fmt::Display) -> Self {
        FilterError::Failed(reason.to_string())
    }
}

/// Match and action contract shared by native and scripted filters.
pub trait FilterRule: Send + Sync {
    fn kind(&self) -> FilterKind;

    fn check(&self, process: &ProcessSnapshot) -> Result<MatchOutcome, FilterError>;

    fn action(&self, process: &ProcessSnapshot) -> Result<ActionOutcome, FilterError>;

    /// Release any external resource held by the rule. Called once when the
    /// filter leaves the registry.
    fn release(&self) {}
}

type MatchFn<D> = dyn Fn(&ProcessSnapshot, &D) -> Result<MatchOutcome, FilterError> + Send + Sync;
type ActionFn<D> =
    dyn Fn(&ProcessSnapshot, &D) -> Result<ActionOutcome, FilterError> + Send + Sync;

/// Filter implemented in Rust, carrying its own typed data.
pub struct NativeRule<D> {
    data: D,
    check: Box<MatchFn<D>>,
    action: Box<ActionFn<D>>,
}

impl<D> NativeRule<D>
where
    D: Send + Sync,
{
    pub fn new<M, A>(data: D, check: M, action: A) -> Self
    where
        M: Fn(&ProcessSnapshot, &D) -> Result<MatchOutcome, FilterError> + Send + Sync + 'static,
        A: Fn(&ProcessSnapshot, &D) -> Result<ActionOutcome, FilterError> + Send + Sync + 'static,
    {
        Self {
            data,
            check: Box::new(check),
            action: Box::new(action),
        }
    }

    pub fn data(&self) -> &D {
        &self.data
    }
}

impl<D> FilterRule for NativeRule<D>
where
    D: Send + Sync,
{
    fn kind(&self) -> FilterKind {
        FilterKind::Native
    }

    fn check(&self, process: &ProcessSnapshot) -> Result<MatchOutcome, FilterError> {
        (self.check)(process, &self.data)
    }

    fn action(&self, process: &ProcessSnapshot) -> Result<ActionOutcome, FilterError> {
        (self.action)(process, &self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterName(Cow<'static, str>);

impl Deref for FilterName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&'static str> for FilterName {
    fn from(val: &'static str) -> FilterName {
        FilterName(Cow::Borrowed(val))
    }
}

impl From<String> for FilterName {
    fn from(val: String) -> FilterName {
        FilterName(Cow::Owned(val))
    }
}

impl fmt::Display for FilterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named rule together with its private decision cache.
pub struct Filter {
    name: FilterName,
    rule: Box<dyn FilterRule>,
    cache: Mutex<DecisionCache>,
}

impl Filter {
    pub fn new<N, R>(name: N, rule: R) -> Self
    where
        N: Into<FilterName>,
        R: FilterRule + 'static,
    {
        Self {
            name: name.into(),
            rule: Box::new(rule),
            cache: Mutex::new(DecisionCache::new()),
        }
    }

    /// Shortcut for a filter backed by a [`NativeRule`].
    pub fn native<N, D, M, A>(name: N, data: D, check: M, action: A) -> Self
    where
        N: Into<FilterName>,
        D: Send + Sync + 'static,
        M: Fn(&ProcessSnapshot, &D) -> Result<MatchOutcome, FilterError> + Send + Sync + 'static,
        A: Fn(&ProcessSnapshot, &D) -> Result<ActionOutcome, FilterError> + Send + Sync + 'static,
    {
        Self::new(name, NativeRule::new(data, check, action))
    }

    pub fn name(&self) -> &FilterName {
        &self.name
    }

    pub fn kind(&self) -> FilterKind {
        self.rule.kind()
    }

    /// Run the match function. A panic inside the rule is turned into
    /// [`FilterError::Panicked`].
    pub fn check(&self, process: &ProcessSnapshot) -> Result<MatchOutcome, FilterError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.rule.check(process)))
            .unwrap_or_else(|payload| Err(FilterError::Panicked(panic_message(payload))))
    }

    /// Run the action function. A panic inside the rule is turned into
    /// [`FilterError::Panicked`].
    pub fn action(&self, process: &ProcessSnapshot) -> Result<ActionOutcome, FilterError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.rule.action(process)))
            .unwrap_or_else(|payload| Err(FilterError::Panicked(panic_message(payload))))
    }

    pub fn cache(&self) -> MutexGuard<'_, DecisionCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every cached decision and the rule resources.
    pub(crate) fn release(&self) {
        self.cache().clear();
        self.rule.release();
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
