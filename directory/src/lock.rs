//! Advisory locks held through the existence of a sentinel object.
//!
//! A lock is held while an object named by its lock path exists. Obtaining a lock is a
//! single create-if-absent call, so of any number of concurrent callers (in this process
//! or any other sharing the store) exactly one succeeds. There is no ownership check:
//! anyone can release a lock, and a lock whose holder crashed stays held until it is
//! cleared.
//!
//! [Manager] hands out at most one [Lock] handle per lock path, so every caller within a
//! process that asks for the same name shares the same handle.

use crate::{directory::join, Error, MutualExclusionLock};
use blobdir_store::Store;
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};
use tracing::{debug, warn};

/// A lock backed by a sentinel object at [Lock::path].
pub struct Lock<S: Store> {
    store: S,
    path: String,
}

impl<S: Store> Lock<S> {
    fn new(store: S, path: String) -> Self {
        Self { store, path }
    }

    /// Name of the sentinel object.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Try to take the lock without waiting.
    ///
    /// Returns `true` only if this call created the sentinel.
    pub async fn obtain(&self) -> Result<bool, Error> {
        let obtained = self.store.create(&self.path, 0).await?;
        if obtained {
            debug!(path = %self.path, "obtained lock");
        } else {
            debug!(path = %self.path, "lock held elsewhere");
        }
        Ok(obtained)
    }

    /// Delete the sentinel if it exists.
    pub async fn release(&self) -> Result<(), Error> {
        if self.store.delete(&self.path).await? {
            debug!(path = %self.path, "released lock");
        }
        Ok(())
    }

    /// Return whether the sentinel exists.
    pub async fn is_locked(&self) -> Result<bool, Error> {
        Ok(self.store.exists(&self.path).await?)
    }
}

impl<S: Store> MutualExclusionLock for Lock<S> {
    fn obtain(&self) -> impl Future<Output = Result<bool, Error>> + Send {
        Lock::obtain(self)
    }

    fn release(&self) -> impl Future<Output = Result<(), Error>> + Send {
        Lock::release(self)
    }

    fn is_locked(&self) -> impl Future<Output = Result<bool, Error>> + Send {
        Lock::is_locked(self)
    }
}

/// Registry of lock handles for one folder.
#[derive(Clone)]
pub struct Manager<S: Store> {
    store: S,
    folder: String,
    prefix: Option<String>,
    locks: Arc<Mutex<HashMap<String, Arc<Lock<S>>>>>,
}

impl<S: Store> Manager<S> {
    /// Create a manager that places lock sentinels in `folder`.
    pub fn new(store: S, folder: String, prefix: Option<String>) -> Self {
        Self {
            store,
            folder,
            prefix,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Prefix added to every lock name, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Change the prefix used for locks made from now on.
    ///
    /// Handles that were already made keep their paths.
    pub fn set_prefix(&mut self, prefix: Option<String>) {
        self.prefix = prefix;
    }

    /// Resolve the sentinel object name for `name`.
    pub fn lock_path(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => join(&self.folder, &format!("{prefix}-{name}")),
            None => join(&self.folder, name),
        }
    }

    /// Return the handle for `name`, creating it if this manager has not made it yet.
    pub fn make(&self, name: &str) -> Arc<Lock<S>> {
        let path = self.lock_path(name);
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(path)
            .or_insert_with_key(|path| Arc::new(Lock::new(self.store.clone(), path.clone())))
            .clone()
    }

    /// Release the lock for `name` and forget its handle.
    ///
    /// If no handle was made for `name`, any sentinel left behind (for example by a
    /// crashed process) is deleted anyway.
    pub async fn clear(&self, name: &str) -> Result<(), Error> {
        let path = self.lock_path(name);
        let handle = self.locks.lock().unwrap().remove(&path);
        match handle {
            Some(lock) => {
                lock.release().await?;
                debug!(path = %path, "cleared lock");
            }
            None => {
                if self.store.delete(&path).await? {
                    warn!(path = %path, "cleared stale lock");
                }
            }
        }
        Ok(())
    }

    /// Number of handles currently registered.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    /// Return whether no handles are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
