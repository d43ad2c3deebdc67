//! Expose a page store as a directory of sequential outputs, random-access inputs, and
//! advisory locks.
//!
//! A search index writes each of its files exactly once, front to back, and later reads
//! them at arbitrary offsets. This crate maps that access pattern onto a
//! [blobdir_store::Store], which only understands whole-page writes, byte-range reads, and
//! resizes:
//!
//! - [Write] buffers a logical byte stream and commits it in page-aligned chunks, growing
//!   the backing object ahead of every chunk.
//! - [Read] serves single bytes from a cached page and bulk reads from direct range fetches.
//! - [lock::Lock] holds a lock while a sentinel object exists, and [lock::Manager] hands out
//!   one in-process handle per lock path.
//! - [Directory] resolves file names inside a folder and ties the above together.
//!
//! # Logical Length
//!
//! The physical length of an object is always a multiple of [blobdir_store::PAGE_SIZE] and
//! usually includes growth headroom, so it overstates the content. [Write] records the real
//! content length as the [ACTUAL_LENGTH] metadata value after every commit, and every
//! length lookup prefers that value over the physical length.
//!
//! # Example
//!
//! ```rust
//! use blobdir_directory::{Config, Directory};
//! use blobdir_store::memory::Store;
//!
//! futures::executor::block_on(async {
//!     let directory = Directory::new(Store::default(), Config::new("index")).unwrap();
//!
//!     // Write a file
//!     let mut output = directory.create_output("_0.cfs").await.unwrap();
//!     output.write_bytes(b"hello world").await.unwrap();
//!     output.close().await.unwrap();
//!
//!     // Read it back
//!     let mut input = directory.open_input("_0.cfs").await.unwrap();
//!     assert_eq!(input.length(), 11);
//!     let mut buf = [0u8; 5];
//!     input.seek(6).await.unwrap();
//!     input.read_bytes(&mut buf).await.unwrap();
//!     assert_eq!(&buf, b"world");
//!
//!     // Serialize writers with a lock
//!     let lock = directory.make_lock("write.lock");
//!     assert!(lock.obtain().await.unwrap());
//!     lock.release().await.unwrap();
//! });
//! ```

use blobdir_store::{MAX_WRITE, PAGE_SIZE, PAGE_SIZE_U64};
use std::future::Future;
use thiserror::Error;

mod directory;
pub use directory::Directory;
pub mod lock;
pub mod ram;
mod read;
pub use read::Read;
mod write;
pub use write::Write;

/// Metadata key holding the logical length of an object, in decimal.
pub const ACTUAL_LENGTH: &str = "actuallength";

/// Default capacity of a [Write] buffer.
pub const DEFAULT_WRITE_BUFFER: usize = 64 * 1024;

/// Default maximum number of bytes fetched by one bulk read.
pub const DEFAULT_MAX_READ: usize = 1024 * 1024;

/// Errors that can occur when interacting with a [Directory] or its streams.
#[derive(Debug, Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] blobdir_store::Error),
    #[error("stream closed")]
    Closed,
    #[error("seek beyond end: position={position} length={length}")]
    SeekBeyondEnd { position: u64, length: u64 },
    #[error("end of stream: position={position} requested={requested} length={length}")]
    EndOfStream {
        position: u64,
        requested: usize,
        length: u64,
    },
    #[error("invalid length metadata on {name}: {value:?}")]
    InvalidLength { name: String, value: String },
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Configuration for a [Directory].
#[derive(Clone, Debug)]
pub struct Config {
    /// Folder (object name prefix) holding the files of this directory.
    pub folder: String,

    /// Prefix added to every lock name, if any.
    pub lock_prefix: Option<String>,

    /// Capacity of each [Write] buffer. Must be a multiple of [PAGE_SIZE].
    pub write_buffer: usize,

    /// Maximum number of bytes committed by one page write. Must be a multiple of
    /// [PAGE_SIZE] no larger than [MAX_WRITE].
    pub max_write: usize,

    /// Maximum number of bytes fetched by one bulk read.
    pub max_read: usize,

    /// Headroom added on top of the required length whenever an object grows. Must be a
    /// multiple of [PAGE_SIZE].
    pub growth: u64,
}

impl Config {
    /// Create a configuration for `folder` with default buffer sizes.
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            lock_prefix: None,
            write_buffer: DEFAULT_WRITE_BUFFER,
            max_write: MAX_WRITE,
            max_read: DEFAULT_MAX_READ,
            growth: PAGE_SIZE_U64,
        }
    }

    /// Check that every size is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.write_buffer == 0 || self.write_buffer % PAGE_SIZE != 0 {
            return Err(Error::InvalidConfig(
                "write_buffer must be a positive multiple of the page size",
            ));
        }
        if self.max_write == 0 || self.max_write % PAGE_SIZE != 0 || self.max_write > MAX_WRITE {
            return Err(Error::InvalidConfig(
                "max_write must be a positive multiple of the page size within the store limit",
            ));
        }
        if self.max_read == 0 {
            return Err(Error::InvalidConfig("max_read must be positive"));
        }
        if self.growth % PAGE_SIZE_U64 != 0 {
            return Err(Error::InvalidConfig(
                "growth must be a multiple of the page size",
            ));
        }
        Ok(())
    }
}

/// A stream that accepts bytes strictly in order.
pub trait SequentialWriter: Send {
    /// Append one byte.
    fn write_byte(&mut self, byte: u8) -> impl Future<Output = Result<(), Error>> + Send;

    /// Append a slice of bytes.
    fn write_bytes(&mut self, bytes: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;

    /// Make every byte appended so far durable.
    fn flush(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Flush and release the stream. Any later call fails with [Error::Closed].
    fn close(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Number of bytes appended so far.
    fn position(&self) -> u64;
}

/// A stream that can be read at arbitrary positions.
pub trait RandomReader: Send {
    /// Read the byte at the current position and advance past it.
    fn read_byte(&mut self) -> impl Future<Output = Result<u8, Error>> + Send;

    /// Fill `buf` from the current position and advance past it.
    fn read_bytes(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<(), Error>> + Send;

    /// Move to `position`, which may not exceed [RandomReader::length].
    fn seek(&mut self, position: u64) -> impl Future<Output = Result<(), Error>> + Send;

    /// Current position.
    fn position(&self) -> u64;

    /// Logical length of the stream.
    fn length(&self) -> u64;

    /// Release the stream. Any later read fails with [Error::Closed].
    fn close(&mut self);
}

/// An advisory lock shared between processes.
pub trait MutualExclusionLock: Send + Sync {
    /// Try to take the lock without waiting. Returns `false` if it is already held.
    fn obtain(&self) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Give up the lock. Releasing a lock that is not held does nothing.
    fn release(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Return whether anyone holds the lock.
    fn is_locked(&self) -> impl Future<Output = Result<bool, Error>> + Send;
}
