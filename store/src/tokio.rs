//! A [crate::Store] that keeps each object in a file on local disk.
//!
//! Every object is stored as `<directory>/<hex(sha256(name))>`, so file names have a fixed
//! length no matter how long the object name is. Next to it, `<directory>/<hex>.meta` holds
//! the object name on its first line followed by its metadata as `key=value` lines. The
//! sidecar is written to a temporary file and renamed into place.

use crate::{
    validate_length, validate_metadata, validate_name, validate_pages, Error, Listing, Properties,
};
use bytes::Bytes;
use commonware_utils::hex;
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};
use tracing::warn;

const METADATA_EXTENSION: &str = "meta";
const TEMPORARY_EXTENSION: &str = "tmp";

#[derive(Clone)]
pub struct Config {
    /// Directory holding every object file.
    pub directory: PathBuf,
    /// Maximum number of names returned by a single listing.
    pub list_page_size: usize,
}

impl Config {
    pub const fn new(directory: PathBuf, list_page_size: usize) -> Self {
        Self {
            directory,
            list_page_size,
        }
    }
}

/// Disk-backed page store.
#[derive(Clone)]
pub struct Store {
    lock: Arc<Mutex<()>>,
    cfg: Config,
}

/// File name stem of the object `name`.
fn stem(name: &str) -> String {
    hex(&Sha256::digest(name.as_bytes()))
}

/// Parse a sidecar into the object name and its metadata.
fn parse_sidecar(raw: &str, path: &Path) -> Result<(String, BTreeMap<String, String>), Error> {
    let corrupt = || Error::MetadataCorrupt(path.display().to_string());
    let mut lines = raw.lines();
    let name = lines.next().filter(|name| !name.is_empty()).ok_or_else(corrupt)?;
    let mut metadata = BTreeMap::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let (key, value) = line.split_once('=').ok_or_else(corrupt)?;
        metadata.insert(key.to_string(), value.to_string());
    }
    Ok((name.to_string(), metadata))
}

impl Store {
    /// Create a store rooted at `cfg.directory`. The directory is created on first use.
    ///
    /// # Panics
    ///
    /// Panics if `cfg.list_page_size` is zero.
    pub fn new(cfg: Config) -> Self {
        assert!(
            cfg.list_page_size > 0,
            "list page size must be greater than zero"
        );
        Self {
            lock: Arc::new(Mutex::new(())),
            cfg,
        }
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.cfg.directory.join(stem(name))
    }

    fn sidecar_path(&self, name: &str) -> PathBuf {
        self.cfg
            .directory
            .join(format!("{}.{METADATA_EXTENSION}", stem(name)))
    }

    async fn open(&self, name: &str) -> Result<fs::File, Error> {
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.data_path(name))
            .await
            .map_err(|e| missing_or(e, name))
    }

    /// Read the sidecar at `path`, or `None` if there is none.
    async fn read_sidecar(
        path: &Path,
    ) -> Result<Option<(String, BTreeMap<String, String>)>, Error> {
        match fs::read_to_string(path).await {
            Ok(raw) => parse_sidecar(&raw, path).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the sidecar of `name`. The caller must hold the filesystem lock.
    async fn write_sidecar(
        &self,
        name: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let mut raw = String::from(name);
        raw.push('\n');
        for (key, value) in metadata {
            raw.push_str(key);
            raw.push('=');
            raw.push_str(value);
            raw.push('\n');
        }
        let path = self.sidecar_path(name);
        let temporary = path.with_extension(format!("{METADATA_EXTENSION}.{TEMPORARY_EXTENSION}"));
        let mut file = fs::File::create(&temporary).await?;
        file.write_all(raw.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temporary, &path).await?;
        Ok(())
    }
}

/// Map a "not found" I/O error to [Error::ObjectMissing].
fn missing_or(err: std::io::Error, name: &str) -> Error {
    if err.kind() == ErrorKind::NotFound {
        return Error::ObjectMissing(name.into());
    }
    Error::Io(err)
}

impl crate::Store for Store {
    async fn create(&self, name: &str, size: u64) -> Result<bool, Error> {
        validate_name(name)?;
        validate_length(size)?;

        // Acquire the filesystem lock
        let _guard = self.lock.lock().await;
        fs::create_dir_all(&self.cfg.directory).await?;

        // Creation fails if the file exists, so only one caller can win
        let file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.data_path(name))
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.set_len(size).await?;
        file.sync_all().await?;

        // An object without a sidecar cannot be listed, so undo the creation on failure
        if let Err(e) = self.write_sidecar(name, &BTreeMap::new()).await {
            let _ = fs::remove_file(self.data_path(name)).await;
            return Err(e);
        }
        Ok(true)
    }

    async fn resize(&self, name: &str, len: u64) -> Result<(), Error> {
        validate_name(name)?;
        validate_length(len)?;

        let file = self.open(name).await?;
        file.set_len(len).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn read(&self, name: &str, offset: u64, len: usize) -> Result<Bytes, Error> {
        validate_name(name)?;

        let mut file = self.open(name).await?;
        let size = file.metadata().await?.len();
        let end = offset.checked_add(len as u64);
        if !matches!(end, Some(end) if end <= size) {
            return Err(Error::OutOfBounds {
                name: name.into(),
                offset,
                len: len as u64,
                size,
            });
        }
        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn write_pages(&self, name: &str, offset: u64, data: Bytes) -> Result<(), Error> {
        validate_name(name)?;
        validate_pages(offset, data.len())?;

        let mut file = self.open(name).await?;
        let size = file.metadata().await?.len();
        let end = offset.checked_add(data.len() as u64);
        if !matches!(end, Some(end) if end <= size) {
            return Err(Error::OutOfBounds {
                name: name.into(),
                offset,
                len: data.len() as u64,
                size,
            });
        }
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&data).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, Error> {
        validate_name(name)?;
        Ok(fs::try_exists(self.data_path(name)).await?)
    }

    async fn properties(&self, name: &str) -> Result<Properties, Error> {
        validate_name(name)?;

        let length = fs::metadata(self.data_path(name))
            .await
            .map_err(|e| missing_or(e, name))?
            .len();
        let metadata = Self::read_sidecar(&self.sidecar_path(name))
            .await?
            .map(|(_, metadata)| metadata)
            .unwrap_or_default();
        Ok(Properties { length, metadata })
    }

    async fn set_metadata(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        validate_name(name)?;
        validate_metadata(&metadata)?;

        // Acquire the filesystem lock
        let _guard = self.lock.lock().await;
        if !fs::try_exists(self.data_path(name)).await? {
            return Err(Error::ObjectMissing(name.into()));
        }

        self.write_sidecar(name, &metadata).await
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        validate_name(name)?;

        // Acquire the filesystem lock
        let _guard = self.lock.lock().await;
        let deleted = match fs::remove_file(self.data_path(name)).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        // A sidecar without its object is ignored, so remove it last
        match fs::remove_file(self.sidecar_path(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(deleted)
    }

    async fn list(&self, prefix: &str, token: Option<&str>) -> Result<Listing, Error> {
        // Acquire the filesystem lock
        let _guard = self.lock.lock().await;
        let mut entries = match fs::read_dir(&self.cfg.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Listing::default()),
            Err(e) => return Err(e.into()),
        };

        // Resolve every object file to its name, skipping sidecars and temporary files
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.contains('.') {
                continue;
            }
            let sidecar = self
                .cfg
                .directory
                .join(format!("{file_name}.{METADATA_EXTENSION}"));
            let Some((name, _)) = Self::read_sidecar(&sidecar).await? else {
                warn!(file = file_name, "skipping object without sidecar");
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            if token.is_some_and(|token| name.as_str() <= token) {
                continue;
            }
            names.push(name);
        }
        names.sort();

        // If there is at least one more name, hand out a continuation token
        let next = if names.len() > self.cfg.list_page_size {
            names.truncate(self.cfg.list_page_size);
            names.last().cloned()
        } else {
            None
        };
        Ok(Listing { names, next })
    }
}
