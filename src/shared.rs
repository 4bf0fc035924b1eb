// 13.0 shared.rs: thread-safe handle. every call takes the one engine lock, so
// writers are serialized and each flow's ledger write and state change land
// together. a poisoned lock is reported as a storage failure.

use crate::engine::{Engine, EngineError};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::error;

#[derive(Debug, Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<Engine>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Runs a mutating operation under the engine lock.
    pub fn execute<T>(&self, op: impl FnOnce(&mut Engine) -> Result<T, EngineError>) -> Result<T, EngineError> {
        let mut engine = self.lock()?;
        op(&mut engine)
    }

    pub fn read<T>(&self, f: impl FnOnce(&Engine) -> T) -> Result<T, EngineError> {
        let engine = self.lock()?;
        Ok(f(&engine))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Engine>, EngineError> {
        self.inner.lock().map_err(|_| {
            error!("engine lock poisoned");
            EngineError::Storage("engine lock poisoned".into())
        })
    }
}
