use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use nspawn_model::TaskId;

/// Registry of live task handles, shared by all lifecycle operations.
pub struct TaskStore<T> {
    inner: Arc<RwLock<HashMap<TaskId, Arc<T>>>>,
}

impl<T> Clone for TaskStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for TaskStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskStore<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, Arc<T>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, Arc<T>>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &TaskId) -> Option<Arc<T>> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.read().contains_key(id)
    }

    /// Insert `handle` unless the id is taken; a refused handle is handed back.
    pub fn insert_new(&self, id: TaskId, handle: Arc<T>) -> Result<(), Arc<T>> {
        let mut tasks = self.write();
        if tasks.contains_key(&id) {
            return Err(handle);
        }
        tasks.insert(id, handle);
        Ok(())
    }

    pub fn remove(&self, id: &TaskId) -> Option<Arc<T>> {
        self.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.read().keys().cloned().collect()
    }
}
