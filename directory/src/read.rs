use crate::{Error, RandomReader, ACTUAL_LENGTH};
use blobdir_store::{Properties, Store, PAGE_SIZE, PAGE_SIZE_U64};
use bytes::Bytes;
use std::future::Future;
use tracing::trace;

/// Offset of the page containing `position`.
const fn page_offset(position: u64) -> u64 {
    position - position % PAGE_SIZE_U64
}

/// Resolve the logical length of an object: the [ACTUAL_LENGTH] metadata value if
/// present, otherwise the physical length.
pub(crate) fn logical_length(name: &str, props: &Properties) -> Result<u64, Error> {
    match props.metadata.get(ACTUAL_LENGTH) {
        Some(value) => value.parse().map_err(|_| Error::InvalidLength {
            name: name.into(),
            value: value.clone(),
        }),
        None => Ok(props.length),
    }
}

/// A reader that serves random access over a [Store] object.
///
/// Single-byte reads are served from a cached page, which is replaced whenever the
/// position moves to another page. Bulk reads bypass the cache and fetch exactly the
/// requested range, at most `max_read` bytes per store call.
///
/// Cloning a reader yields an independent cursor over the same object.
#[derive(Clone)]
pub struct Read<S: Store> {
    store: S,
    name: String,
    max_read: usize,

    position: u64,
    /// Most recently fetched page and its offset.
    page: Option<(u64, Bytes)>,
    /// Logical length, resolved when opened.
    length: u64,

    closed: bool,
}

impl<S: Store> Read<S> {
    /// Open a reader at the start of `name`.
    ///
    /// Fails if the object does not exist.
    ///
    /// # Panics
    ///
    /// Panics if `max_read` is zero.
    pub async fn open(store: S, name: String, max_read: usize) -> Result<Self, Error> {
        assert!(max_read > 0, "max read must be greater than zero");
        let props = store.properties(&name).await?;
        let length = logical_length(&name, &props)?;
        Ok(Self {
            store,
            name,
            max_read,
            position: 0,
            page: None,
            length,
            closed: false,
        })
    }

    /// Name of the backing object.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Logical length as last resolved.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Query the store for the current logical length.
    pub async fn refresh_length(&mut self) -> Result<u64, Error> {
        let props = self.store.properties(&self.name).await?;
        self.length = logical_length(&self.name, &props)?;
        Ok(self.length)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn ensure_available(&self, requested: usize) -> Result<(), Error> {
        if self.position + requested as u64 > self.length {
            return Err(Error::EndOfStream {
                position: self.position,
                requested,
                length: self.length,
            });
        }
        Ok(())
    }

    /// Read the byte at the current position and advance past it.
    ///
    /// An empty object reads as a single `0` byte and the position does not move.
    pub async fn read_byte(&mut self) -> Result<u8, Error> {
        self.ensure_open()?;
        if self.length == 0 {
            return Ok(0);
        }
        self.ensure_available(1)?;

        // Use the cached page if it covers the position, otherwise replace it
        let offset = page_offset(self.position);
        let page = match self.page.take() {
            Some((cached, page)) if cached == offset => page,
            _ => {
                trace!(name = %self.name, offset, "fetching page");
                self.store.read(&self.name, offset, PAGE_SIZE).await?
            }
        };
        let byte = page[(self.position - offset) as usize];
        self.page = Some((offset, page));
        self.position += 1;
        Ok(byte)
    }

    /// Fill `buf` from the current position and advance past it.
    ///
    /// An empty object fills `buf` with zeros and the position does not move.
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(());
        }
        if self.length == 0 {
            buf.fill(0);
            return Ok(());
        }
        self.ensure_available(buf.len())?;

        // Fetch at most max_read bytes at a time
        let mut filled = 0;
        while filled < buf.len() {
            let len = (buf.len() - filled).min(self.max_read);
            trace!(name = %self.name, offset = self.position, len, "fetching range");
            let data = self.store.read(&self.name, self.position, len).await?;
            buf[filled..filled + len].copy_from_slice(&data);
            filled += len;
            self.position += len as u64;
        }
        Ok(())
    }

    /// Move to `position` without fetching anything.
    ///
    /// If the cached length is zero, the length is queried again first so that a reader
    /// opened on a fresh object can follow a concurrent writer.
    pub async fn seek(&mut self, position: u64) -> Result<(), Error> {
        self.ensure_open()?;
        if self.length == 0 {
            self.refresh_length().await?;
        }
        if position > self.length {
            return Err(Error::SeekBeyondEnd {
                position,
                length: self.length,
            });
        }
        self.position = position;
        Ok(())
    }

    /// Release the cached page. Any later read fails with [Error::Closed].
    pub fn close(&mut self) {
        self.closed = true;
        self.page = None;
    }
}

impl<S: Store> RandomReader for Read<S> {
    fn read_byte(&mut self) -> impl Future<Output = Result<u8, Error>> + Send {
        Read::read_byte(self)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<(), Error>> + Send {
        Read::read_bytes(self, buf)
    }

    fn seek(&mut self, position: u64) -> impl Future<Output = Result<(), Error>> + Send {
        Read::seek(self, position)
    }

    fn position(&self) -> u64 {
        Read::position(self)
    }

    fn length(&self) -> u64 {
        Read::length(self)
    }

    fn close(&mut self) {
        Read::close(self)
    }
}
