use crate::{Error, Listing, Properties};
use bytes::Bytes;
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::{collections::BTreeMap, sync::Arc};

/// Counters maintained by a metered [Store].
pub struct Metrics {
    pub creates: Counter,
    pub deletes: Counter,
    pub resizes: Counter,
    pub reads: Counter,
    pub read_bytes: Counter,
    pub page_writes: Counter,
    pub page_write_bytes: Counter,
    pub metadata_updates: Counter,
}

impl Metrics {
    /// Initialize the `Metrics` struct and register the metrics in the provided registry.
    fn new(registry: &mut Registry) -> Self {
        let metrics = Self {
            creates: Counter::default(),
            deletes: Counter::default(),
            resizes: Counter::default(),
            reads: Counter::default(),
            read_bytes: Counter::default(),
            page_writes: Counter::default(),
            page_write_bytes: Counter::default(),
            metadata_updates: Counter::default(),
        };

        registry.register(
            "creates",
            "Number of objects created",
            metrics.creates.clone(),
        );
        registry.register(
            "deletes",
            "Number of objects deleted",
            metrics.deletes.clone(),
        );
        registry.register(
            "resizes",
            "Number of object resizes",
            metrics.resizes.clone(),
        );
        registry.register(
            "reads",
            "Total number of range reads",
            metrics.reads.clone(),
        );
        registry.register(
            "read_bytes",
            "Total amount of data read from the store",
            metrics.read_bytes.clone(),
        );
        registry.register(
            "page_writes",
            "Total number of page writes",
            metrics.page_writes.clone(),
        );
        registry.register(
            "page_write_bytes",
            "Total amount of data written to the store",
            metrics.page_write_bytes.clone(),
        );
        registry.register(
            "metadata_updates",
            "Number of metadata replacements",
            metrics.metadata_updates.clone(),
        );

        metrics
    }
}

/// A wrapper around a [crate::Store] implementation that tracks metrics.
#[derive(Clone)]
pub struct Store<S> {
    inner: S,
    metrics: Arc<Metrics>,
}

impl<S> Store<S> {
    pub fn new(inner: S, registry: &mut Registry) -> Self {
        Self {
            inner,
            metrics: Metrics::new(registry).into(),
        }
    }

    /// Return the counters of this store.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl<S: crate::Store> crate::Store for Store<S> {
    async fn create(&self, name: &str, size: u64) -> Result<bool, Error> {
        let created = self.inner.create(name, size).await?;
        if created {
            self.metrics.creates.inc();
        }
        Ok(created)
    }

    async fn resize(&self, name: &str, len: u64) -> Result<(), Error> {
        self.inner.resize(name, len).await?;
        self.metrics.resizes.inc();
        Ok(())
    }

    async fn read(&self, name: &str, offset: u64, len: usize) -> Result<Bytes, Error> {
        let data = self.inner.read(name, offset, len).await?;
        self.metrics.reads.inc();
        self.metrics.read_bytes.inc_by(data.len() as u64);
        Ok(data)
    }

    async fn write_pages(&self, name: &str, offset: u64, data: Bytes) -> Result<(), Error> {
        let len = data.len() as u64;
        self.inner.write_pages(name, offset, data).await?;
        self.metrics.page_writes.inc();
        self.metrics.page_write_bytes.inc_by(len);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, Error> {
        self.inner.exists(name).await
    }

    async fn properties(&self, name: &str) -> Result<Properties, Error> {
        self.inner.properties(name).await
    }

    async fn set_metadata(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        self.inner.set_metadata(name, metadata).await?;
        self.metrics.metadata_updates.inc();
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        let deleted = self.inner.delete(name).await?;
        if deleted {
            self.metrics.deletes.inc();
        }
        Ok(deleted)
    }

    async fn list(&self, prefix: &str, token: Option<&str>) -> Result<Listing, Error> {
        self.inner.list(prefix, token).await
    }
}
