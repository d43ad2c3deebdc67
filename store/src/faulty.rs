//! A [crate::Store] wrapper that fails selected operations on demand.

use crate::{Error, Listing, Properties};
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

/// An operation that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Resize,
    Read,
    WritePages,
    Exists,
    Properties,
    SetMetadata,
    Delete,
    List,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Resize => "resize",
            Self::Read => "read",
            Self::WritePages => "write_pages",
            Self::Exists => "exists",
            Self::Properties => "properties",
            Self::SetMetadata => "set_metadata",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

/// Wraps a store and returns [Error::Injected] for armed operations.
///
/// An operation armed with `after = n` succeeds `n` more times and then fails on
/// every call until it is healed.
#[derive(Clone)]
pub struct Store<S> {
    inner: S,
    armed: Arc<Mutex<HashMap<Op, usize>>>,
}

impl<S> Store<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            armed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fail `op` after it has succeeded `after` more times.
    pub fn fail(&self, op: Op, after: usize) {
        self.armed.lock().unwrap().insert(op, after);
    }

    /// Stop failing `op`.
    pub fn heal(&self, op: Op) {
        self.armed.lock().unwrap().remove(&op);
    }

    fn check(&self, op: Op) -> Result<(), Error> {
        let mut armed = self.armed.lock().unwrap();
        match armed.get_mut(&op) {
            Some(0) => Err(Error::Injected(op.name())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<S: crate::Store> crate::Store for Store<S> {
    async fn create(&self, name: &str, size: u64) -> Result<bool, Error> {
        self.check(Op::Create)?;
        self.inner.create(name, size).await
    }

    async fn resize(&self, name: &str, len: u64) -> Result<(), Error> {
        self.check(Op::Resize)?;
        self.inner.resize(name, len).await
    }

    async fn read(&self, name: &str, offset: u64, len: usize) -> Result<Bytes, Error> {
        self.check(Op::Read)?;
        self.inner.read(name, offset, len).await
    }

    async fn write_pages(&self, name: &str, offset: u64, data: Bytes) -> Result<(), Error> {
        self.check(Op::WritePages)?;
        self.inner.write_pages(name, offset, data).await
    }

    async fn exists(&self, name: &str) -> Result<bool, Error> {
        self.check(Op::Exists)?;
        self.inner.exists(name).await
    }

    async fn properties(&self, name: &str) -> Result<Properties, Error> {
        self.check(Op::Properties)?;
        self.inner.properties(name).await
    }

    async fn set_metadata(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        self.check(Op::SetMetadata)?;
        self.inner.set_metadata(name, metadata).await
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        self.check(Op::Delete)?;
        self.inner.delete(name).await
    }

    async fn list(&self, prefix: &str, token: Option<&str>) -> Result<Listing, Error> {
        self.check(Op::List)?;
        self.inner.list(prefix, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::Store as MemoryStore, tests::run_store_tests, Store as _};

    #[tokio::test]
    async fn test_faulty_store_passthrough() {
        run_store_tests(Store::new(MemoryStore::default())).await;
    }

    #[tokio::test]
    async fn test_fail_after() {
        let store = Store::new(MemoryStore::default());
        store.fail(Op::Create, 1);

        // First create succeeds, then every create fails
        assert!(store.create("a", 0).await.unwrap());
        assert!(matches!(
            store.create("b", 0).await,
            Err(Error::Injected("create"))
        ));
        assert!(matches!(
            store.create("c", 0).await,
            Err(Error::Injected("create"))
        ));

        // Other operations are unaffected
        assert!(store.exists("a").await.unwrap());

        // Healing restores the operation
        store.heal(Op::Create);
        assert!(store.create("b", 0).await.unwrap());
    }
}
