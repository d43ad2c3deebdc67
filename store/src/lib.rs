//! Read, write, and grow page-aligned objects in a remote page store.
//!
//! A page store holds named objects whose physical length is always a multiple of
//! [PAGE_SIZE]. Objects can only be written in whole pages (at most [MAX_WRITE] bytes
//! per call), but may be read at any byte range that lies within their physical length.
//! Each object also carries a small string-to-string metadata map that is replaced
//! atomically by [Store::set_metadata].
//!
//! # Backends
//!
//! - [memory::Store]: keeps every object in process memory.
//! - [tokio::Store]: keeps every object in a file on local disk.
//! - [metered::Store]: wraps another [Store] and counts operations.
//! - [faulty::Store]: wraps another [Store] and fails selected operations on demand.

use bytes::Bytes;
use std::{collections::BTreeMap, future::Future};
use thiserror::Error;

pub mod faulty;
pub mod memory;
pub mod metered;
pub mod tokio;

/// Smallest unit the store can write.
pub const PAGE_SIZE: usize = 512;

/// [PAGE_SIZE] as a `u64`, for offset arithmetic.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// Maximum number of bytes accepted by a single [Store::write_pages] call.
pub const MAX_WRITE: usize = 4 * 1024 * 1024;

/// Maximum length of an object name, in bytes.
pub const MAX_NAME_LENGTH: usize = 1024;

/// Errors that can occur when interacting with a [Store].
#[derive(Error, Debug)]
pub enum Error {
    #[error("object name invalid: {0:?}")]
    NameInvalid(String),
    #[error("metadata invalid: {0:?}")]
    MetadataInvalid(String),
    #[error("object missing: {0}")]
    ObjectMissing(String),
    #[error("unaligned access: offset={offset} len={len}")]
    Unaligned { offset: u64, len: u64 },
    #[error("write too large: {0} bytes")]
    WriteTooLarge(usize),
    #[error("range out of bounds: {name} offset={offset} len={len} size={size}")]
    OutOfBounds {
        name: String,
        offset: u64,
        len: u64,
        size: u64,
    },
    #[error("injected fault: {0}")]
    Injected(&'static str),
    #[error("metadata corrupt: {0}")]
    MetadataCorrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Length and metadata of an object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    /// Physical length of the object (always a multiple of [PAGE_SIZE]).
    pub length: u64,
    /// Metadata attached to the object.
    pub metadata: BTreeMap<String, String>,
}

/// One page of a [Store::list] result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    /// Object names in ascending order.
    pub names: Vec<String>,
    /// Token to pass to the next [Store::list] call, or `None` if this was the last page.
    pub next: Option<String>,
}

/// Interface to a store of named, page-addressable objects.
///
/// Every method is a single round trip to the store. Cloning a [Store] yields a handle to
/// the same underlying objects.
pub trait Store: Clone + Send + Sync + 'static {
    /// Create an object of `size` zero bytes if no object named `name` exists.
    ///
    /// Returns `true` if this call created the object. Of any number of concurrent callers
    /// for the same name, at most one observes `true`.
    fn create(&self, name: &str, size: u64) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Set the physical length of an object, extending it with zeros if it grows.
    fn resize(&self, name: &str, len: u64) -> impl Future<Output = Result<(), Error>> + Send;

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// The range must lie within the physical length of the object.
    fn read(
        &self,
        name: &str,
        offset: u64,
        len: usize,
    ) -> impl Future<Output = Result<Bytes, Error>> + Send;

    /// Write whole pages starting at `offset`.
    ///
    /// Both `offset` and `data.len()` must be multiples of [PAGE_SIZE], `data` may not
    /// exceed [MAX_WRITE] bytes, and the range must already be backed by the object's
    /// physical length.
    fn write_pages(
        &self,
        name: &str,
        offset: u64,
        data: Bytes,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Return whether an object named `name` exists.
    fn exists(&self, name: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Return the physical length and metadata of an object.
    fn properties(&self, name: &str) -> impl Future<Output = Result<Properties, Error>> + Send;

    /// Replace the metadata of an object.
    fn set_metadata(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Delete an object if it exists, returning whether it did.
    fn delete(&self, name: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// List one page of object names starting with `prefix`.
    ///
    /// Pass the `next` token of the previous [Listing] to continue where it left off.
    fn list(
        &self,
        prefix: &str,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Listing, Error>> + Send;
}

/// Validate that an object name is non-empty, bounded, and free of control characters.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH || name.chars().any(char::is_control) {
        return Err(Error::NameInvalid(name.into()));
    }
    Ok(())
}

/// Validate that every metadata key is a non-empty identifier (ASCII alphanumeric or
/// underscore) and that no value contains control characters.
pub fn validate_metadata(metadata: &BTreeMap<String, String>) -> Result<(), Error> {
    for (key, value) in metadata {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::MetadataInvalid(key.clone()));
        }
        if value.chars().any(char::is_control) {
            return Err(Error::MetadataInvalid(format!("{key}={value}")));
        }
    }
    Ok(())
}

/// Validate that a page write is aligned and within the transfer limit.
pub fn validate_pages(offset: u64, len: usize) -> Result<(), Error> {
    if len > MAX_WRITE {
        return Err(Error::WriteTooLarge(len));
    }
    if offset % PAGE_SIZE_U64 != 0 || len % PAGE_SIZE != 0 {
        return Err(Error::Unaligned {
            offset,
            len: len as u64,
        });
    }
    Ok(())
}

/// Validate that a physical length is page aligned.
pub fn validate_length(len: u64) -> Result<(), Error> {
    if len % PAGE_SIZE_U64 != 0 {
        return Err(Error::Unaligned { offset: 0, len });
    }
    Ok(())
}
