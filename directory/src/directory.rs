use crate::{
    lock::{Lock, Manager},
    read::logical_length,
    Config, Error, Read, Write,
};
use blobdir_store::Store;
use std::{collections::BTreeSet, sync::Arc};
use tracing::debug;

/// Join `name` onto `folder`, or return `name` if there is no folder.
pub(crate) fn join(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        return name.into();
    }
    format!("{folder}/{name}")
}

/// A flat directory of files stored as objects under one folder of a [Store].
///
/// Every file name is resolved to the object `folder/name`. Files are written once through
/// [Directory::create_output] and read any number of times through
/// [Directory::open_input]. Locks made through [Directory::make_lock] live in the same
/// folder and are deduplicated per lock path for the lifetime of this directory.
#[derive(Clone)]
pub struct Directory<S: Store> {
    store: S,
    cfg: Config,
    locks: Manager<S>,
}

impl<S: Store> Directory<S> {
    /// Create a directory over `cfg.folder`.
    ///
    /// Leading and trailing slashes are trimmed from the folder.
    pub fn new(store: S, mut cfg: Config) -> Result<Self, Error> {
        cfg.validate()?;
        cfg.folder = cfg.folder.trim_matches('/').to_string();
        let locks = Manager::new(store.clone(), cfg.folder.clone(), cfg.lock_prefix.clone());
        Ok(Self { store, cfg, locks })
    }

    /// Folder holding the files of this directory.
    pub fn folder(&self) -> &str {
        &self.cfg.folder
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve `name` to its object name.
    pub fn resolve(&self, name: &str) -> String {
        join(&self.cfg.folder, name)
    }

    /// Open a writer for `name`, creating the file if it does not exist.
    ///
    /// An existing file is overwritten from the start.
    pub async fn create_output(&self, name: &str) -> Result<Write<S>, Error> {
        Write::open(
            self.store.clone(),
            self.resolve(name),
            self.cfg.write_buffer,
            self.cfg.max_write,
            self.cfg.growth,
        )
        .await
    }

    /// Open a reader for `name`. Fails if the file does not exist.
    pub async fn open_input(&self, name: &str) -> Result<Read<S>, Error> {
        Read::open(self.store.clone(), self.resolve(name), self.cfg.max_read).await
    }

    /// Delete `name`, returning whether it existed.
    pub async fn delete_file(&self, name: &str) -> Result<bool, Error> {
        let path = self.resolve(name);
        let deleted = self.store.delete(&path).await?;
        debug!(path = %path, deleted, "deleted file");
        Ok(deleted)
    }

    /// Return whether `name` exists.
    pub async fn file_exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.store.exists(&self.resolve(name)).await?)
    }

    /// Logical length of `name`, or `-1` if it does not exist.
    pub async fn file_length(&self, name: &str) -> Result<i64, Error> {
        let path = self.resolve(name);
        let props = match self.store.properties(&path).await {
            Ok(props) => props,
            Err(blobdir_store::Error::ObjectMissing(_)) => return Ok(-1),
            Err(e) => return Err(e.into()),
        };
        let length = logical_length(&path, &props)?;
        Ok(i64::try_from(length).unwrap_or(i64::MAX))
    }

    /// Names of every object in the folder, relative to the folder.
    ///
    /// Lock sentinels live in the folder too and are included.
    pub async fn list_all(&self) -> Result<BTreeSet<String>, Error> {
        let prefix = if self.cfg.folder.is_empty() {
            String::new()
        } else {
            format!("{}/", self.cfg.folder)
        };

        // Drain every page of the listing
        let mut names = BTreeSet::new();
        let mut token: Option<String> = None;
        loop {
            let listing = self.store.list(&prefix, token.as_deref()).await?;
            for name in listing.names {
                if let Some(relative) = name.strip_prefix(prefix.as_str()) {
                    names.insert(relative.to_string());
                }
            }
            match listing.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(names)
    }

    /// Return the lock handle for `name`.
    ///
    /// Repeated calls for the same name return the same handle.
    pub fn make_lock(&self, name: &str) -> Arc<Lock<S>> {
        self.locks.make(name)
    }

    /// Release the lock for `name` and forget its handle.
    pub async fn clear_lock(&self, name: &str) -> Result<(), Error> {
        self.locks.clear(name).await
    }

    /// Set the prefix added to lock names made from now on.
    pub fn set_lock_prefix(&mut self, prefix: Option<String>) {
        self.cfg.lock_prefix.clone_from(&prefix);
        self.locks.set_prefix(prefix);
    }

    /// Prefix added to lock names, if any.
    pub fn lock_prefix(&self) -> Option<&str> {
        self.locks.prefix()
    }

    /// Stable identifier for this directory, derived from its folder.
    ///
    /// Suitable as a lock prefix shared by every process that opens the same folder.
    pub fn lock_id(&self) -> String {
        format!("blobdir-{:08x}", crc32fast::hash(self.cfg.folder.as_bytes()))
    }

    /// Make `names` durable.
    ///
    /// Every flushed write is already durable at the store, so there is nothing to do.
    pub async fn sync(&self, names: &[&str]) -> Result<(), Error> {
        debug!(folder = %self.cfg.folder, files = names.len(), "sync");
        Ok(())
    }
}
