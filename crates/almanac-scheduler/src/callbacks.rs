use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::crontab::NOP_CALLBACK;

/// Failure reported by a job callback. Logged by the engine, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type CallbackResult = std::result::Result<(), CallbackError>;

/// Something a job can invoke with its positional string arguments.
///
/// Runs synchronously on the polling thread, so it should return quickly.
/// [`SchedulerHandle::poll`](crate::SchedulerHandle::poll) releases the engine
/// lock first, so a callback may manage jobs through a handle. Calling the
/// handle from inside [`SchedulerHandle::with_engine`](crate::SchedulerHandle::with_engine)
/// deadlocks.
pub trait JobCallback: Send + Sync {
    fn call(&self, args: &[String]) -> CallbackResult;
}

impl<F> JobCallback for F
where
    F: Fn(&[String]) -> CallbackResult + Send + Sync,
{
    fn call(&self, args: &[String]) -> CallbackResult {
        self(args)
    }
}

/// Name → callback table, filled by explicit registration at startup.
///
/// Crontab lines refer to callbacks by name; a name that is not registered
/// here cannot be scheduled.
pub struct CallbackRegistry {
    callbacks: HashMap<String, Arc<dyn JobCallback>>,
}

impl CallbackRegistry {
    /// Empty registry without built-ins.
    pub fn empty() -> Self {
        Self {
            callbacks: HashMap::new(),
        }
    }

    /// Registry holding the built-in `almanac.nop` callback.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(NOP_CALLBACK, |args: &[String]| {
            debug!(?args, "running nop");
            Ok(())
        });
        registry
    }

    /// Register (or replace) a closure under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(&[String]) -> CallbackResult + Send + Sync + 'static,
    {
        self.register_callback(name, Arc::new(callback));
    }

    /// Register (or replace) an already shared callback under `name`.
    pub fn register_callback(&mut self, name: impl Into<String>, callback: Arc<dyn JobCallback>) {
        let name = name.into();
        if self.callbacks.insert(name.clone(), callback).is_some() {
            info!(%name, "callback replaced");
        } else {
            debug!(%name, "callback registered");
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn JobCallback>> {
        self.callbacks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.callbacks.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
