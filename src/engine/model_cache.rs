//! Model Cache (C4): a process-wide bounded pool of loaded models keyed by
//! path, with at-most-one-concurrent-user exclusivity per entry.
//!
//! Grounded on the original system's `WhisperCachedModel`/`CACHED_MODELS`
//! list (a linear scan for a free entry, else load if under capacity, else
//! fail) and the teacher's `OnceCell<Arc<Mutex<_>>>` single-model pattern,
//! generalized here to N entries instead of one.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, ServerError};

/// Any loaded recognizer model, erased behind a trait object so the cache
/// doesn't need to know whether it holds a Whisper or Vosk model. Engines
/// recover their concrete type via `as_any().downcast_ref`.
pub trait LoadedModel: Send + Sync + std::any::Any {
    fn path(&self) -> &str;
    fn as_any(&self) -> &dyn std::any::Any;
}

struct CacheEntry {
    path: String,
    model: Arc<dyn LoadedModel>,
    in_use: bool,
}

struct Inner {
    entries: Vec<CacheEntry>,
    capacity: usize,
}

#[derive(Clone)]
pub struct ModelCache {
    inner: Arc<Mutex<Inner>>,
}

/// Guards a leased model. Clears the cache entry's `in_use` flag on drop, so
/// release happens on every exit path including panics during inference —
/// this replaces the source's ad-hoc `in_use` boolean with an explicit lease.
pub struct ModelLease {
    inner: Arc<Mutex<Inner>>,
    path: String,
    model: Arc<dyn LoadedModel>,
}

impl ModelLease {
    pub fn model(&self) -> &Arc<dyn LoadedModel> {
        &self.model
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner
            .entries
            .iter_mut()
            .find(|e| e.path == self.path && e.in_use)
        {
            entry.in_use = false;
        }
    }
}

impl ModelCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: Vec::new(),
                capacity,
            })),
        }
    }

    /// Returns a free entry for `path` if one exists, loads a new one via
    /// `loader` if the cache has room, or fails with `AsrEngineError` if the
    /// cache is at capacity.
    pub fn get_or_create<F>(&self, path: &str, loader: F) -> Result<ModelLease>
    where
        F: FnOnce() -> Result<Arc<dyn LoadedModel>>,
    {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner
            .entries
            .iter_mut()
            .find(|e| e.path == path && !e.in_use)
        {
            entry.in_use = true;
            return Ok(ModelLease {
                inner: self.inner.clone(),
                path: path.to_string(),
                model: entry.model.clone(),
            });
        }

        if inner.entries.len() >= inner.capacity {
            return Err(ServerError::AsrEngineError(format!(
                "model cache at capacity ({}), cannot load {path}",
                inner.capacity
            )));
        }

        let model = loader()?;
        inner.entries.push(CacheEntry {
            path: path.to_string(),
            model: model.clone(),
            in_use: true,
        });

        Ok(ModelLease {
            inner: self.inner.clone(),
            path: path.to_string(),
            model,
        })
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyModel(String);
    impl LoadedModel for DummyModel {
        fn path(&self) -> &str {
            &self.0
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn reuses_free_entry_instead_of_reloading() {
        let cache = ModelCache::new(2);
        let load_count = Arc::new(Mutex::new(0));

        let make_loader = |count: Arc<Mutex<i32>>| {
            move || -> Result<Arc<dyn LoadedModel>> {
                *count.lock() += 1;
                Ok(Arc::new(DummyModel("a.bin".to_string())))
            }
        };

        let lease1 = cache
            .get_or_create("a.bin", make_loader(load_count.clone()))
            .unwrap();
        drop(lease1);
        let _lease2 = cache
            .get_or_create("a.bin", make_loader(load_count.clone()))
            .unwrap();

        assert_eq!(*load_count.lock(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn fails_when_capacity_exceeded() {
        let cache = ModelCache::new(1);
        let _lease1 = cache
            .get_or_create("a.bin", || Ok(Arc::new(DummyModel("a.bin".to_string())) as _))
            .unwrap();

        let err = cache
            .get_or_create("b.bin", || Ok(Arc::new(DummyModel("b.bin".to_string())) as _))
            .unwrap_err();
        assert_eq!(err.code(), 500);
    }

    #[test]
    fn lease_drop_releases_entry_for_reuse() {
        let cache = ModelCache::new(1);
        let lease = cache
            .get_or_create("a.bin", || Ok(Arc::new(DummyModel("a.bin".to_string())) as _))
            .unwrap();
        drop(lease);

        let result = cache.get_or_create("b.bin", || {
            Ok(Arc::new(DummyModel("b.bin".to_string())) as _)
        });
        assert!(result.is_ok());
    }
}
