use crate::{Error, SequentialWriter, ACTUAL_LENGTH};
use blobdir_store::{Store, PAGE_SIZE, PAGE_SIZE_U64};
use bytes::Bytes;
use std::{collections::BTreeMap, future::Future};
use tracing::{debug, trace};

/// Round `len` up to the next page boundary.
const fn page_ceil(len: u64) -> u64 {
    len.div_ceil(PAGE_SIZE_U64) * PAGE_SIZE_U64
}

/// A writer that buffers a logical byte stream and commits it to a [Store] object in
/// page-aligned chunks.
///
/// # Layout
///
/// `position` is the page-aligned offset where the next commit lands. The buffer always
/// holds the bytes that logically follow `position`, so the logical stream position is
/// `position + buffer.len()`.
///
/// Commits only ever write the page-aligned prefix of the buffered bytes. The trailing
/// 0-511 bytes stay buffered until more data completes their page. When the stream is
/// flushed explicitly (or closed), those trailing bytes are also written as one
/// zero-padded page at `position` without advancing it, so the next commit rewrites that
/// page with the merged content.
///
/// # Growth
///
/// Before each page write the object is resized, if needed, to cover the written range
/// plus `growth` bytes of headroom. The object is never shrunk. After the write, the
/// logical end of the committed data is recorded as [ACTUAL_LENGTH] metadata.
pub struct Write<S: Store> {
    store: S,
    name: String,

    /// Bytes following `position`, allocated on first write and dropped on close.
    buffer: Option<Vec<u8>>,
    capacity: usize,
    max_write: usize,
    growth: u64,

    /// Page-aligned offset where the next commit lands.
    position: u64,
    /// Physical length known to be backed by the object.
    provisioned: u64,
    /// Logical length last recorded in metadata.
    length: u64,
    metadata: BTreeMap<String, String>,

    closed: bool,
}

impl<S: Store> Write<S> {
    /// Open a writer at the start of `name`, creating the object if it does not exist.
    ///
    /// An existing object keeps its physical length (it is reused as capacity), but its
    /// recorded logical length is reset to zero.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `max_write` is not a positive multiple of [PAGE_SIZE], or if
    /// `growth` is not a multiple of [PAGE_SIZE].
    pub async fn open(
        store: S,
        name: String,
        capacity: usize,
        max_write: usize,
        growth: u64,
    ) -> Result<Self, Error> {
        assert!(
            capacity > 0 && capacity % PAGE_SIZE == 0,
            "buffer capacity must be a positive multiple of the page size"
        );
        assert!(
            max_write > 0 && max_write % PAGE_SIZE == 0,
            "max write must be a positive multiple of the page size"
        );
        assert!(
            growth % PAGE_SIZE_U64 == 0,
            "growth must be a multiple of the page size"
        );

        let mut writer = Self {
            store,
            name,
            buffer: None,
            capacity,
            max_write,
            growth,
            position: 0,
            provisioned: 0,
            length: 0,
            metadata: BTreeMap::new(),
            closed: false,
        };
        if writer.store.create(&writer.name, 0).await? {
            debug!(name = %writer.name, "created object");
            return Ok(writer);
        }

        // Reuse the capacity of an existing object but start it over logically
        let props = writer.store.properties(&writer.name).await?;
        writer.provisioned = props.length;
        writer.metadata = props.metadata;
        writer.record_length(0).await?;
        debug!(
            name = %writer.name,
            provisioned = writer.provisioned,
            "reopened existing object"
        );
        Ok(writer)
    }

    /// Name of the backing object.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of bytes appended so far, including buffered bytes.
    pub fn position(&self) -> u64 {
        self.position + self.buffered() as u64
    }

    /// Logical length last recorded on the backing object.
    pub fn length(&self) -> u64 {
        self.length
    }

    fn buffered(&self) -> usize {
        self.buffer.as_ref().map_or(0, Vec::len)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Append one byte.
    pub async fn write_byte(&mut self, byte: u8) -> Result<(), Error> {
        self.ensure_open()?;
        let capacity = self.capacity;
        let buffer = self
            .buffer
            .get_or_insert_with(|| Vec::with_capacity(capacity));
        buffer.push(byte);
        if buffer.len() == capacity {
            self.flush_buffer().await?;
        }
        Ok(())
    }

    /// Append a slice of bytes.
    ///
    /// A slice larger than the buffer that arrives while the buffer is empty is committed
    /// directly, without being copied into the buffer first.
    pub async fn write_bytes(&mut self, mut bytes: &[u8]) -> Result<(), Error> {
        self.ensure_open()?;
        while !bytes.is_empty() {
            if self.buffered() == 0 && bytes.len() > self.capacity {
                let aligned = bytes.len() - bytes.len() % PAGE_SIZE;
                self.commit(&bytes[..aligned]).await?;
                self.record_length(self.position).await?;
                let capacity = self.capacity;
                self.buffer
                    .get_or_insert_with(|| Vec::with_capacity(capacity))
                    .extend_from_slice(&bytes[aligned..]);
                return Ok(());
            }

            // Fill the buffer, flushing it whenever it is full
            let capacity = self.capacity;
            let buffer = self
                .buffer
                .get_or_insert_with(|| Vec::with_capacity(capacity));
            let take = (capacity - buffer.len()).min(bytes.len());
            buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if buffer.len() == capacity {
                self.flush_buffer().await?;
            }
        }
        Ok(())
    }

    /// Commit every buffered byte, including a trailing partial page.
    ///
    /// The partial page is written zero-padded but its bytes remain buffered, so the next
    /// commit rewrites it with whatever follows.
    pub async fn flush(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.flush_buffer().await?;

        // Write the remainder as a single padded page
        let excess = self.buffered();
        if excess == 0 {
            return Ok(());
        }
        let mut page = vec![0u8; PAGE_SIZE];
        if let Some(buffer) = &self.buffer {
            page[..excess].copy_from_slice(buffer);
        }
        self.ensure_capacity(self.position + PAGE_SIZE_U64).await?;
        trace!(
            name = %self.name,
            offset = self.position,
            excess,
            "writing partial page"
        );
        self.store
            .write_pages(&self.name, self.position, Bytes::from(page))
            .await?;
        self.record_length(self.position + excess as u64).await
    }

    /// Flush any buffered bytes and release the buffer.
    ///
    /// The writer is unusable afterwards, even if the final flush fails.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        let result = self.flush().await;
        self.closed = true;
        self.buffer = None;
        debug!(name = %self.name, length = self.length, "closed writer");
        result
    }

    /// Commit the page-aligned prefix of the buffer and keep the remainder at its front.
    async fn flush_buffer(&mut self) -> Result<(), Error> {
        let Some(mut buffer) = self.buffer.take() else {
            return Ok(());
        };
        let aligned = buffer.len() - buffer.len() % PAGE_SIZE;
        if aligned == 0 {
            self.buffer = Some(buffer);
            return Ok(());
        }
        let start = self.position;
        let result = self.commit(&buffer[..aligned]).await;
        buffer.drain(..(self.position - start) as usize);
        self.buffer = Some(buffer);
        result?;
        self.record_length(self.position).await
    }

    /// Write page-aligned `data` at `position`, in chunks of at most `max_write` bytes.
    async fn commit(&mut self, data: &[u8]) -> Result<(), Error> {
        debug_assert_eq!(data.len() % PAGE_SIZE, 0);
        for chunk in data.chunks(self.max_write) {
            let end = self.position + chunk.len() as u64;
            self.ensure_capacity(end).await?;
            trace!(
                name = %self.name,
                offset = self.position,
                len = chunk.len(),
                "writing pages"
            );
            self.store
                .write_pages(&self.name, self.position, Bytes::copy_from_slice(chunk))
                .await?;
            self.position = end;
        }
        Ok(())
    }

    /// Grow the object so it covers `end`, if it does not already.
    async fn ensure_capacity(&mut self, end: u64) -> Result<(), Error> {
        if end <= self.provisioned {
            return Ok(());
        }
        let target = page_ceil(end) + self.growth;
        self.store.resize(&self.name, target).await?;
        debug!(
            name = %self.name,
            from = self.provisioned,
            to = target,
            "resized object"
        );
        self.provisioned = target;
        Ok(())
    }

    /// Record `length` as the logical length of the object, if it changed.
    async fn record_length(&mut self, length: u64) -> Result<(), Error> {
        let value = length.to_string();
        if self.metadata.get(ACTUAL_LENGTH) == Some(&value) {
            self.length = length;
            return Ok(());
        }
        let mut metadata = self.metadata.clone();
        metadata.insert(ACTUAL_LENGTH.to_string(), value);
        self.store.set_metadata(&self.name, metadata.clone()).await?;
        self.metadata = metadata;
        self.length = length;
        Ok(())
    }
}

impl<S: Store> SequentialWriter for Write<S> {
    fn write_byte(&mut self, byte: u8) -> impl Future<Output = Result<(), Error>> + Send {
        Write::write_byte(self, byte)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> impl Future<Output = Result<(), Error>> + Send {
        Write::write_bytes(self, bytes)
    }

    fn flush(&mut self) -> impl Future<Output = Result<(), Error>> + Send {
        Write::flush(self)
    }

    fn close(&mut self) -> impl Future<Output = Result<(), Error>> + Send {
        Write::close(self)
    }

    fn position(&self) -> u64 {
        Write::position(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobdir_store::{
        faulty::{self, Op},
        memory, metered, MAX_WRITE,
    };
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use blobdir_store::{Listing, Properties};
    use prometheus_client::registry::Registry;
    use std::sync::{Arc, Mutex};
    use test_case::test_case;

    const BUFFER: usize = 64 * 1024;

    /// Store that remembers the offset and length of every page write.
    #[derive(Clone, Default)]
    struct Recording {
        inner: memory::Store,
        writes: Arc<Mutex<Vec<(u64, usize)>>>,
    }

    impl Store for Recording {
        async fn create(&self, name: &str, size: u64) -> Result<bool, blobdir_store::Error> {
            self.inner.create(name, size).await
        }

        async fn resize(&self, name: &str, len: u64) -> Result<(), blobdir_store::Error> {
            self.inner.resize(name, len).await
        }

        async fn read(
            &self,
            name: &str,
            offset: u64,
            len: usize,
        ) -> Result<Bytes, blobdir_store::Error> {
            self.inner.read(name, offset, len).await
        }

        async fn write_pages(
            &self,
            name: &str,
            offset: u64,
            data: Bytes,
        ) -> Result<(), blobdir_store::Error> {
            self.writes.lock().unwrap().push((offset, data.len()));
            self.inner.write_pages(name, offset, data).await
        }

        async fn exists(&self, name: &str) -> Result<bool, blobdir_store::Error> {
            self.inner.exists(name).await
        }

        async fn properties(&self, name: &str) -> Result<Properties, blobdir_store::Error> {
            self.inner.properties(name).await
        }

        async fn set_metadata(
            &self,
            name: &str,
            metadata: BTreeMap<String, String>,
        ) -> Result<(), blobdir_store::Error> {
            self.inner.set_metadata(name, metadata).await
        }

        async fn delete(&self, name: &str) -> Result<bool, blobdir_store::Error> {
            self.inner.delete(name).await
        }

        async fn list(
            &self,
            prefix: &str,
            token: Option<&str>,
        ) -> Result<Listing, blobdir_store::Error> {
            self.inner.list(prefix, token).await
        }
    }

    async fn open<S: Store>(store: &S, name: &str) -> Write<S> {
        Write::open(store.clone(), name.into(), BUFFER, MAX_WRITE, PAGE_SIZE_U64)
            .await
            .unwrap()
    }

    async fn contents<S: Store>(store: &S, name: &str) -> Vec<u8> {
        let props = store.properties(name).await.unwrap();
        let length: u64 = props.metadata[ACTUAL_LENGTH].parse().unwrap();
        assert!(length <= props.length, "logical length beyond physical length");
        store
            .read(name, 0, length as usize)
            .await
            .unwrap()
            .to_vec()
    }

    #[test_traced]
    fn test_write_small() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let store = memory::Store::default();
            let mut writer = open(&store, "small").await;

            // Nothing reaches the store until the writer is flushed
            writer.write_bytes(b"hello").await.unwrap();
            writer.write_byte(b'!').await.unwrap();
            assert_eq!(writer.position(), 6);
            assert_eq!(store.properties("small").await.unwrap().length, 0);

            writer.close().await.unwrap();
            assert_eq!(writer.length(), 6);
            assert_eq!(contents(&store, "small").await, b"hello!");

            // One page of data plus one page of headroom
            assert_eq!(store.properties("small").await.unwrap().length, 1024);
        });
    }

    #[test_case(511, 1, 1024; "sub page remainder")]
    #[test_case(512, 1, 1024; "exact page")]
    #[test_case(513, 2, 1024; "page plus remainder")]
    fn test_write_page_boundaries(len: usize, page_writes: u64, physical: u64) {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let mut registry = Registry::default();
            let store = metered::Store::new(memory::Store::default(), &mut registry);
            let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();

            let mut writer = open(&store, "boundary").await;
            writer.write_bytes(&data).await.unwrap();
            writer.close().await.unwrap();

            assert_eq!(contents(&store, "boundary").await, data);
            assert_eq!(store.metrics().page_writes.get(), page_writes);
            let props = store.properties("boundary").await.unwrap();
            assert_eq!(props.length, physical);
            assert!(props.length > len as u64);
        });
    }

    #[test_traced]
    fn test_write_larger_than_max_write() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let mut registry = Registry::default();
            let store = metered::Store::new(memory::Store::default(), &mut registry);
            let data: Vec<u8> = (0..6 * 1024 * 1024).map(|i: u32| (i % 253) as u8).collect();

            // A single write of 6 MiB bypasses the buffer and is split at 4 MiB
            let mut writer = open(&store, "large").await;
            writer.write_bytes(&data).await.unwrap();
            assert_eq!(store.metrics().page_writes.get(), 2);
            writer.close().await.unwrap();

            assert_eq!(contents(&store, "large").await, data);
            assert!(store.metrics().page_writes.get() > 1);
            assert_eq!(
                store.metrics().page_write_bytes.get(),
                data.len() as u64,
                "6 MiB is page aligned, so no partial page is written"
            );
        });
    }

    #[test_traced]
    fn test_write_bypass_keeps_excess() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let mut registry = Registry::default();
            let store = metered::Store::new(memory::Store::default(), &mut registry);
            let data: Vec<u8> = (0..BUFFER + 700).map(|i| (i % 251) as u8).collect();

            let mut writer = open(&store, "bypass").await;
            writer.write_bytes(&data).await.unwrap();

            // The aligned prefix is committed and the excess is still buffered
            let aligned = (BUFFER + 512) as u64;
            assert_eq!(writer.length(), aligned);
            assert_eq!(writer.position(), data.len() as u64);
            assert_eq!(store.metrics().page_write_bytes.get(), aligned);

            // Follow up with a small write; the excess merges into the same page
            writer.write_bytes(b"tail").await.unwrap();
            writer.close().await.unwrap();

            let mut expected = data.clone();
            expected.extend_from_slice(b"tail");
            assert_eq!(contents(&store, "bypass").await, expected);
        });
    }

    #[test_traced]
    fn test_write_bypass_after_partial_fill() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let store = memory::Store::default();
            let head: Vec<u8> = vec![0xAA; 100];
            let body: Vec<u8> = (0..2 * BUFFER + 3).map(|i| (i % 247) as u8).collect();

            let mut writer = open(&store, "mixed").await;
            writer.write_bytes(&head).await.unwrap();
            writer.write_bytes(&body).await.unwrap();
            writer.close().await.unwrap();

            let mut expected = head.clone();
            expected.extend_from_slice(&body);
            assert_eq!(contents(&store, "mixed").await, expected);
        });
    }

    #[test_traced]
    fn test_flush_partial_page_then_merge() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let store = memory::Store::default();
            let mut writer = open(&store, "merge").await;

            // Flushing a partial page makes it durable without advancing past it
            writer.write_bytes(b"abc").await.unwrap();
            writer.flush().await.unwrap();
            assert_eq!(contents(&store, "merge").await, b"abc");
            assert_eq!(writer.position(), 3);

            // Later bytes merge into the same page
            writer.write_bytes(b"def").await.unwrap();
            writer.flush().await.unwrap();
            assert_eq!(contents(&store, "merge").await, b"abcdef");

            // And across the page boundary
            let fill = vec![b'x'; 1000];
            writer.write_bytes(&fill).await.unwrap();
            writer.close().await.unwrap();
            let mut expected = b"abcdef".to_vec();
            expected.extend_from_slice(&fill);
            assert_eq!(contents(&store, "merge").await, expected);
        });
    }

    #[test_traced]
    fn test_page_writes_never_move_backwards() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let store = Recording::default();
            let mut writer = Write::open(
                store.clone(),
                "ordered".into(),
                2 * PAGE_SIZE,
                MAX_WRITE,
                PAGE_SIZE_U64,
            )
            .await
            .unwrap();

            // Partial page, flushed, then completed by a buffer-full commit
            writer.write_bytes(&[1u8; 300]).await.unwrap();
            writer.flush().await.unwrap();
            writer.write_bytes(&[2u8; 800]).await.unwrap();
            writer.write_bytes(&[3u8; 3000]).await.unwrap();
            writer.flush().await.unwrap();
            writer.close().await.unwrap();

            // Offsets never decrease, and the only repeat is a flushed partial page
            // being rewritten by the next write
            let writes = store.writes.lock().unwrap().clone();
            assert_eq!(writes[0], (0, PAGE_SIZE));
            assert_eq!(writes[1], (0, 2 * PAGE_SIZE));
            for pair in writes.windows(2) {
                let ((previous, previous_len), (next, _)) = (pair[0], pair[1]);
                assert!(next >= previous, "page write moved backwards: {writes:?}");
                if next == previous {
                    assert_eq!(previous_len, PAGE_SIZE, "only a partial page is rewritten");
                }
            }

            let mut expected = vec![1u8; 300];
            expected.extend_from_slice(&[2u8; 800]);
            expected.extend_from_slice(&[3u8; 3000]);
            assert_eq!(contents(&store, "ordered").await, expected);
        });
    }

    #[test_traced]
    fn test_write_byte_by_byte_across_buffer() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let mut registry = Registry::default();
            let store = metered::Store::new(memory::Store::default(), &mut registry);
            let data: Vec<u8> = (0..BUFFER + 10).map(|i| (i % 13) as u8).collect();

            let mut writer = open(&store, "bytes").await;
            for byte in &data {
                writer.write_byte(*byte).await.unwrap();
            }

            // Exactly one full buffer has been committed
            assert_eq!(store.metrics().page_writes.get(), 1);
            assert_eq!(writer.length(), BUFFER as u64);

            writer.close().await.unwrap();
            assert_eq!(contents(&store, "bytes").await, data);
        });
    }

    #[test_traced]
    fn test_growth_headroom_avoids_resizes() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let mut registry = Registry::default();
            let store = metered::Store::new(memory::Store::default(), &mut registry);
            let growth = 16 * PAGE_SIZE_U64;
            let mut writer = Write::open(
                store.clone(),
                "growth".into(),
                PAGE_SIZE,
                MAX_WRITE,
                growth,
            )
            .await
            .unwrap();

            // Ten one-page commits fit in the first resize
            for _ in 0..10 {
                writer.write_bytes(&[7u8; PAGE_SIZE]).await.unwrap();
            }
            assert_eq!(store.metrics().resizes.get(), 1);
            assert_eq!(
                store.properties("growth").await.unwrap().length,
                PAGE_SIZE_U64 + growth
            );
            writer.close().await.unwrap();
            assert_eq!(contents(&store, "growth").await, vec![7u8; 10 * PAGE_SIZE]);
        });
    }

    #[test_traced]
    fn test_reopen_existing_object() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let store = memory::Store::default();
            let mut writer = open(&store, "reopen").await;
            writer.write_bytes(&vec![1u8; 3000]).await.unwrap();
            writer.close().await.unwrap();
            let physical = store.properties("reopen").await.unwrap().length;

            // A new writer starts the stream over without shrinking the object
            let mut writer = open(&store, "reopen").await;
            assert_eq!(contents(&store, "reopen").await, Vec::<u8>::new());
            writer.write_bytes(b"short").await.unwrap();
            writer.close().await.unwrap();
            assert_eq!(contents(&store, "reopen").await, b"short");
            assert_eq!(store.properties("reopen").await.unwrap().length, physical);
        });
    }

    #[test_traced]
    fn test_close_empty_stream() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let mut registry = Registry::default();
            let store = metered::Store::new(memory::Store::default(), &mut registry);
            let mut writer = open(&store, "empty").await;
            writer.close().await.unwrap();
            assert_eq!(store.metrics().page_writes.get(), 0);
            assert_eq!(store.properties("empty").await.unwrap().length, 0);
            assert!(matches!(writer.close().await, Err(Error::Closed)));
        });
    }

    #[test_case(Op::Resize; "resize")]
    #[test_case(Op::WritePages; "write pages")]
    #[test_case(Op::SetMetadata; "set metadata")]
    fn test_store_failure_propagates(op: Op) {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let store = faulty::Store::new(memory::Store::default());
            let mut writer = open(&store, "faulty").await;
            store.fail(op, 0);

            // Buffered writes do not touch the store
            writer.write_bytes(b"pending").await.unwrap();

            // The final flush fails and the failure is surfaced
            let result = writer.close().await;
            assert!(matches!(
                result,
                Err(Error::Store(blobdir_store::Error::Injected(_)))
            ));
            assert!(matches!(writer.write_byte(0).await, Err(Error::Closed)));
        });
    }

    #[test_traced]
    fn test_failed_resize_is_not_recorded() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let store = faulty::Store::new(memory::Store::default());
            let mut writer = open(&store, "retry").await;
            store.fail(Op::Resize, 0);
            let data = vec![3u8; 2 * BUFFER];
            assert!(writer.write_bytes(&data).await.is_err());

            // Nothing was committed, so the recorded length is unchanged
            assert_eq!(writer.length(), 0);
            assert_eq!(store.properties("retry").await.unwrap().length, 0);
        });
    }

    #[test]
    fn test_page_ceil() {
        assert_eq!(page_ceil(0), 0);
        assert_eq!(page_ceil(1), 512);
        assert_eq!(page_ceil(512), 512);
        assert_eq!(page_ceil(513), 1024);
    }
}
