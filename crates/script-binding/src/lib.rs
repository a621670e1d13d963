//! Binding between the rule evaluation core and an embedded scripting engine.
//!
//! A scripted filter is a pair of functions (match and action) plus optional
//! data, all living inside the engine and held through [`ScriptRef`]s. The
//! engine is single threaded, so every call goes through [`SharedEngine`].
//!
//! Values returned by scripts are translated into the core outcomes:
//!
//! | returned         | match                  | action                       |
//! |------------------|------------------------|------------------------------|
//! | `nil` / `false`  | no match               | no caching                   |
//! | `true`           | match                  | error                        |
//! | positive integer | match                  | skip for that many seconds   |
//! | `0`              | no match               | skip forever                 |
//! | negative integer | stop every next filter | skip forever                 |

pub mod binding;
pub mod engine;
pub mod loader;

#[cfg(test)]
mod testing;

pub use binding::{ScriptFilter, ScriptHandles, action_outcome, match_outcome};
pub use engine::{STOP, ScriptEngine, ScriptError, ScriptRef, ScriptValue, SharedEngine};
pub use loader::{LoaderError, ScriptFilterDescriptor, load_descriptors, register_all};
