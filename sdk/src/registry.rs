//! ReplayableRegistry - lookup of workflow functions by name
//!
//! Resumption only knows a run's replayable id, so every workflow function
//! must be reachable by name alone, possibly in a process other than the one
//! that started the run.

use crate::error::{ReplayError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

/// Type alias for boxed replayable execution functions
pub type BoxedReplayableFn =
    Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A registered workflow function
pub struct RegisteredReplayable {
    /// Name the function is registered under
    pub name: String,
    invoke_fn: BoxedReplayableFn,
}

impl RegisteredReplayable {
    pub fn new(name: impl Into<String>, invoke_fn: BoxedReplayableFn) -> Self {
        Self {
            name: name.into(),
            invoke_fn,
        }
    }

    /// Invoke the workflow body with JSON arguments
    pub fn invoke(&self, args: Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> {
        (self.invoke_fn)(args)
    }
}

impl std::fmt::Debug for RegisteredReplayable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredReplayable")
            .field("name", &self.name)
            .field("invoke_fn", &"<function>")
            .finish()
    }
}

/// Registry of workflow functions keyed by replayable id
#[derive(Default)]
pub struct ReplayableRegistry {
    replayables: RwLock<HashMap<String, Arc<RegisteredReplayable>>>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<ReplayableRegistry>> = OnceLock::new();

impl ReplayableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> Arc<ReplayableRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(ReplayableRegistry::new()))
            .clone()
    }

    /// Register a type-erased workflow function
    pub fn register_raw(&self, replayable: RegisteredReplayable) -> Result<()> {
        let name = replayable.name.clone();
        let mut replayables = self.replayables.write();

        if replayables.contains_key(&name) {
            return Err(ReplayError::AlreadyRegistered(name));
        }

        tracing::debug!(replayable_id = %name, "Registered replayable");
        replayables.insert(name, Arc::new(replayable));
        Ok(())
    }

    /// Register a typed workflow function.
    ///
    /// Arguments are deserialized from the run's recorded JSON on every play
    /// and the result is serialized back before it is logged.
    ///
    /// # Example
    ///
    /// ```ignore
    /// registry.register("double", |n: i64| async move { Ok(n * 2) })?;
    /// ```
    pub fn register<I, O, F, Fut>(&self, name: &str, f: F) -> Result<()>
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let f = Arc::new(f);
        let invoke_fn: BoxedReplayableFn = Box::new(move |args| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let input: I = serde_json::from_value(args)?;
                let output = f(input).await?;
                Ok(serde_json::to_value(output)?)
            })
        });

        self.register_raw(RegisteredReplayable::new(name, invoke_fn))
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredReplayable>> {
        self.replayables.read().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.replayables.read().contains_key(name)
    }

    /// Get all registered replayable ids
    pub fn names(&self) -> Vec<String> {
        self.replayables.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.replayables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.replayables.read().is_empty()
    }
}

impl std::fmt::Debug for ReplayableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayableRegistry")
            .field("names", &self.names())
            .finish()
    }
}
