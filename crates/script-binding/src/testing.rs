//! In-memory [`ScriptEngine`] used by the tests.

use std::collections::HashMap;

use ulatency_core::ProcessSnapshot;

use crate::engine::{ScriptEngine, ScriptError, ScriptRef, ScriptValue};

type TestFn =
    Box<dyn Fn(&ProcessSnapshot, Option<&str>) -> Result<ScriptValue, ScriptError> + Send>;

enum Global {
    Function(TestFn),
    Data(String),
}

/// Engine whose globals are Rust closures and strings.
#[derive(Default)]
pub struct TestEngine {
    globals: HashMap<String, Global>,
    refs: HashMap<ScriptRef, String>,
    next_ref: u32,
    calls: usize,
    released: Vec<String>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&ProcessSnapshot, Option<&str>) -> Result<ScriptValue, ScriptError> + Send + 'static,
    {
        self.globals
            .insert(name.to_string(), Global::Function(Box::new(f)));
        self
    }

    pub fn with_data(mut self, name: &str, value: &str) -> Self {
        self.globals
            .insert(name.to_string(), Global::Data(value.to_string()));
        self
    }

    /// Number of function invocations so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// References taken and not released yet.
    pub fn live_refs(&self) -> usize {
        self.refs.len()
    }

    /// Globals whose reference was released, in release order.
    pub fn released(&self) -> &[String] {
        &self.released
    }
}

impl ScriptEngine for TestEngine {
    fn reference(&mut self, global: &str) -> Result<ScriptRef, ScriptError> {
        if !self.globals.contains_key(global) {
            return Err(ScriptError::UnknownGlobal(global.to_string()));
        }
        self.next_ref += 1;
        let reference = ScriptRef::from_raw(self.next_ref);
        self.refs.insert(reference, global.to_string());
        Ok(reference)
    }

    fn invoke(
        &mut self,
        function: ScriptRef,
        data: Option<ScriptRef>,
        process: &ProcessSnapshot,
    ) -> Result<ScriptValue, ScriptError> {
        let data = match data {
            None => None,
            Some(reference) => {
                let name = self
                    .refs
                    .get(&reference)
                    .ok_or(ScriptError::InvalidReference(reference))?;
                match self.globals.get(name) {
                    Some(Global::Data(value)) => Some(value.as_str()),
                    _ => None,
                }
            }
        };
        let name = self
            .refs
            .get(&function)
            .ok_or(ScriptError::InvalidReference(function))?;
        let Some(Global::Function(f)) = self.globals.get(name) else {
            return Err(ScriptError::NotCallable(function));
        };
        self.calls += 1;
        f(process, data)
    }

    fn release(&mut self, reference: ScriptRef) {
        if let Some(name) = self.refs.remove(&reference) {
            self.released.push(name);
        }
    }
}
