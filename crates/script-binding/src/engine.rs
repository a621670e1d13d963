use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
};

use thiserror::Error;
use ulatency_core::ProcessSnapshot;

/// Sentinel returned by scripts: from a match function it stops the evaluation
/// of every following filter, from an action it means "never again".
pub const STOP: i64 = -1;

/// Opaque reference to a value living inside the scripting engine (a function
/// or a data table), comparable to an entry of the Lua registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptRef(u32);

impl ScriptRef {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}", self.0)
    }
}

/// Values a script function can hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptValue {
    Nil,
    Boolean(bool),
    Integer(i64),
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Nil => write!(f, "nil"),
            ScriptValue::Boolean(b) => write!(f, "{b}"),
            ScriptValue::Integer(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("global '{0}' not found")]
    UnknownGlobal(String),
    #[error("{0} is not callable")]
    NotCallable(ScriptRef),
    #[error("invalid reference {0}")]
    InvalidReference(ScriptRef),
    #[error("{0}")]
    Runtime(String),
    #[error("engine re-entered from inside a script call")]
    Reentrant,
}

/// Calling convention of the embedded scripting engine.
///
/// References returned by [`ScriptEngine::reference`] keep the value alive
/// inside the engine until [`ScriptEngine::release`] is called.
pub trait ScriptEngine: Send {
    /// Take a reference on the global named `global`.
    fn reference(&mut self, global: &str) -> Result<ScriptRef, ScriptError>;

    /// Call `function` with the process and the optional rule data.
    fn invoke(
        &mut self,
        function: ScriptRef,
        data: Option<ScriptRef>,
        process: &ProcessSnapshot,
    ) -> Result<ScriptValue, ScriptError>;

    fn release(&mut self, reference: ScriptRef);
}

/// Engine shared by every scripted filter.
///
/// The engine state is global to the interpreter and can't be re-entered, so
/// every access goes through one mutex. The thread holding it is recorded:
/// references released from inside a script call (an action unregistering a
/// scripted filter) are queued and handed back to the engine when the call
/// returns.
pub struct SharedEngine<E> {
    inner: Arc<Shared<E>>,
}

struct Shared<E> {
    engine: Mutex<E>,
    owner: Mutex<Option<ThreadId>>,
    deferred: Mutex<Vec<ScriptRef>>,
}

/// Clears the owner when the engine lock is given back.
struct OwnerGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E> Clone for SharedEngine<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: ScriptEngine> SharedEngine<E> {
    pub fn new(engine: E) -> Self {
        Self {
            inner: Arc::new(Shared {
                engine: Mutex::new(engine),
                owner: Mutex::new(None),
                deferred: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Run `f` with exclusive access to the engine.
    ///
    /// Must not be called from inside a script call on the same thread: use
    /// [`SharedEngine::try_with`] where that can happen.
    pub fn with<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        let mut engine = lock(&self.inner.engine);
        *lock(&self.inner.owner) = Some(thread::current().id());
        let _owner = OwnerGuard(&self.inner.owner);

        self.release_deferred(&mut engine);
        let result = f(&mut engine);
        self.release_deferred(&mut engine);
        result
    }

    /// Like [`SharedEngine::with`], failing with [`ScriptError::Reentrant`]
    /// when the current thread is already inside a script call.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut E) -> R) -> Result<R, ScriptError> {
        if self.is_reentrant() {
            return Err(ScriptError::Reentrant);
        }
        Ok(self.with(f))
    }

    /// Give `references` back to the engine. From inside a script call the
    /// release happens when the call returns.
    pub fn release(&self, references: impl IntoIterator<Item = ScriptRef>) {
        if self.is_reentrant() {
            lock(&self.inner.deferred).extend(references);
        } else {
            self.with(|engine| {
                for reference in references {
                    engine.release(reference);
                }
            });
        }
    }

    /// Whether the current thread holds the engine.
    pub fn is_reentrant(&self) -> bool {
        *lock(&self.inner.owner) == Some(thread::current().id())
    }

    fn release_deferred(&self, engine: &mut E) {
        let deferred = std::mem::take(&mut *lock(&self.inner.deferred));
        for reference in deferred {
            engine.release(reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use ulatency_core::Pid;

    use super::*;
    use crate::testing::TestEngine;

    #[test]
    fn calls_are_serialized() {
        let engine = SharedEngine::new(TestEngine::new().with_function("slow", |_, _| {
            thread::sleep(Duration::from_millis(5));
            Ok(ScriptValue::Nil)
        }));
        let function = engine.with(|e| e.reference("slow")).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                thread::spawn(move || {
                    let process = ProcessSnapshot::builder(Pid::from_raw(1)).build();
                    for _ in 0..3 {
                        engine.with(|e| e.invoke(function, None, &process)).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(engine.with(|e| e.calls()), 12);
    }

    #[test]
    fn release_from_inside_a_call_is_deferred() {
        let engine = SharedEngine::new(TestEngine::new().with_data("config", "x"));
        let data = engine.with(|e| e.reference("config")).unwrap();

        let live_inside = engine.with(|e| {
            assert!(engine.is_reentrant());
            engine.release([data]);
            e.live_refs()
        });
        assert_eq!(live_inside, 1);
        assert!(!engine.is_reentrant());
        assert_eq!(engine.with(|e| e.live_refs()), 0);
        assert_eq!(engine.with(|e| e.released().to_vec()), vec!["config"]);
    }

    #[test]
    fn nested_access_is_refused() {
        let engine = SharedEngine::new(TestEngine::new());
        let nested = engine.with(|_| engine.try_with(|e| e.calls()));
        assert_eq!(nested, Err(ScriptError::Reentrant));
        assert_eq!(engine.try_with(|e| e.calls()), Ok(0));
    }

    #[test]
    fn display() {
        assert_eq!(ScriptRef::from_raw(3).to_string(), "ref#3");
        assert_eq!(ScriptValue::Integer(STOP).to_string(), "-1");
        assert_eq!(ScriptValue::Nil.to_string(), "nil");
    }
}
