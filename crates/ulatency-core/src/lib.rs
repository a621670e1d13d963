//! Rule evaluation core of the ulatency daemon.
//!
//! Every scan tick the host collects a [`ProcessSnapshot`] for each live process and
//! hands them to the [`ScanDispatcher`]. The dispatcher walks the filters captured from
//! the [`FilterRegistry`] in registration order and, for every filter, applies the
//! cache check, match and action protocol:
//!
//! - a filter whose [`DecisionCache`] holds a valid skip decision for the pid is skipped
//! - otherwise its match function decides between [`MatchOutcome::NoMatch`],
//!   [`MatchOutcome::Match`] and [`MatchOutcome::StopAll`]
//! - on a match the action runs and its [`ActionOutcome`] is recorded in the cache
//!
//! Filters are either native ([`NativeRule`]) or implemented by a scripting engine
//! (see the `script-binding` crate); both implement [`FilterRule`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use ulatency_core::{
//!     ActionOutcome, Filter, FilterRegistry, MatchOutcome, Pid, ProcessSnapshot,
//!     ScanDispatcher, Timestamp,
//! };
//!
//! let registry = FilterRegistry::new();
//! registry
//!     .register(Filter::native(
//!         "stress",
//!         (),
//!         |process, _| Ok(MatchOutcome::from(process.basename() == "stress")),
//!         |_, _| Ok(ActionOutcome::SkipFor(Duration::from_secs(10))),
//!     ))
//!     .unwrap();
//!
//! let mut dispatcher = ScanDispatcher::new(registry);
//! let processes = vec![ProcessSnapshot::builder(Pid::from_raw(100)).basename("stress").build()];
//! let report = dispatcher.scan(&processes, Timestamp::from_secs(0));
//! assert_eq!(report.actions, 1);
//! ```

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod filter;
pub mod lifecycle;
pub mod procfs;
pub mod registry;
pub mod rule_file;
pub mod snapshot;
pub mod time;

pub use cache::{CacheLookup, CacheStats, DecisionCache};
pub use config::{ConfigError, FilterConfig};
pub use dispatcher::{ScanDispatcher, ScanFailure, ScanReport, ScanStage, SlowCall};
pub use filter::{
    ActionOutcome, Filter, FilterError, FilterKind, FilterName, FilterRule, MatchOutcome,
    NativeRule,
};
pub use lifecycle::ProcessLifecycle;
pub use procfs::{ProcessSource, ProcfsError, ProcfsSource};
pub use registry::{FilterRegistry, RegistryError};
pub use rule_file::{RuleFile, RuleFileError, load_rules_from_dir, parse_rules};
pub use snapshot::{ProcessSnapshot, ProcessSnapshotBuilder};
pub use time::Timestamp;

pub use nix::unistd::{Gid, Pid, Uid};

/// Utility function to pretty print an error with its sources.
///
/// By default Rust won't print the source of an error message, so we use
/// anyhow as an error pretty-printer.
pub fn log_error<E: std::error::Error + Send + Sync + 'static>(msg: &str, err: E) {
    log::error!("{}: {:?}", msg, anyhow::Error::from(err));
}

