//! ulatency is a daemon that keeps the system responsive by classifying the
//! running processes with a set of rules.
//!
//! Every tick the [daemon](crate::daemon) reads all live processes from procfs
//! and runs them through the filters of the registry (see
//! [`ulatency_core`]). Filters are either:
//!
//! - native rules loaded from YAML files by the `rules-filter` module
//! - scripted filters backed by an embedded engine (see [`script_binding`])
//!
//! Example:
//!
//! ```sh
//! # Run the daemon with a custom configuration and debug logs
//! ulatencyd --config-file ./ulatency.ini -v
//! ```
//!
//! ## Feature flags
//!
//! - `default`: Enables rules-filter.
//! - `rules-filter`: Enables the native filters described by YAML rule files.

pub mod cli;
pub mod daemon;

pub use script_binding;
pub use ulatency_core;

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Init logger. We log from info level and above, hide timestamp
/// and module path.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder().filter_level(level_filter).init();
    }
}
