use crate::{
    validate_length, validate_metadata, validate_name, validate_pages, Error, Listing, Properties,
};
use bytes::Bytes;
use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Arc, Mutex},
};

/// Default number of names returned by a single [crate::Store::list] call.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 5000;

#[derive(Default)]
struct Object {
    data: Vec<u8>,
    metadata: BTreeMap<String, String>,
}

/// In-memory page store.
#[derive(Clone)]
pub struct Store {
    objects: Arc<Mutex<BTreeMap<String, Object>>>,
    list_page_size: usize,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(DEFAULT_LIST_PAGE_SIZE)
    }
}

impl Store {
    /// Create an empty store that returns at most `list_page_size` names per listing.
    ///
    /// # Panics
    ///
    /// Panics if `list_page_size` is zero.
    pub fn new(list_page_size: usize) -> Self {
        assert!(list_page_size > 0, "list page size must be greater than zero");
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            list_page_size,
        }
    }
}

impl crate::Store for Store {
    async fn create(&self, name: &str, size: u64) -> Result<bool, Error> {
        validate_name(name)?;
        validate_length(size)?;

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(name) {
            return Ok(false);
        }
        let object = Object {
            data: vec![0; size as usize],
            metadata: BTreeMap::new(),
        };
        objects.insert(name.into(), object);
        Ok(true)
    }

    async fn resize(&self, name: &str, len: u64) -> Result<(), Error> {
        validate_name(name)?;
        validate_length(len)?;

        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| Error::ObjectMissing(name.into()))?;
        object.data.resize(len as usize, 0);
        Ok(())
    }

    async fn read(&self, name: &str, offset: u64, len: usize) -> Result<Bytes, Error> {
        validate_name(name)?;

        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(name)
            .ok_or_else(|| Error::ObjectMissing(name.into()))?;
        let size = object.data.len() as u64;
        let end = offset.checked_add(len as u64);
        if !matches!(end, Some(end) if end <= size) {
            return Err(Error::OutOfBounds {
                name: name.into(),
                offset,
                len: len as u64,
                size,
            });
        }
        let start = offset as usize;
        Ok(Bytes::copy_from_slice(&object.data[start..start + len]))
    }

    async fn write_pages(&self, name: &str, offset: u64, data: Bytes) -> Result<(), Error> {
        validate_name(name)?;
        validate_pages(offset, data.len())?;

        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| Error::ObjectMissing(name.into()))?;
        let size = object.data.len() as u64;
        let end = offset.checked_add(data.len() as u64);
        if !matches!(end, Some(end) if end <= size) {
            return Err(Error::OutOfBounds {
                name: name.into(),
                offset,
                len: data.len() as u64,
                size,
            });
        }
        let start = offset as usize;
        object.data[start..start + data.len()].copy_from_slice(&data);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, Error> {
        validate_name(name)?;
        Ok(self.objects.lock().unwrap().contains_key(name))
    }

    async fn properties(&self, name: &str) -> Result<Properties, Error> {
        validate_name(name)?;

        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(name)
            .ok_or_else(|| Error::ObjectMissing(name.into()))?;
        Ok(Properties {
            length: object.data.len() as u64,
            metadata: object.metadata.clone(),
        })
    }

    async fn set_metadata(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        validate_name(name)?;
        validate_metadata(&metadata)?;

        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| Error::ObjectMissing(name.into()))?;
        object.metadata = metadata;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        validate_name(name)?;
        Ok(self.objects.lock().unwrap().remove(name).is_some())
    }

    async fn list(&self, prefix: &str, token: Option<&str>) -> Result<Listing, Error> {
        let objects = self.objects.lock().unwrap();
        let start = match token {
            Some(token) if token >= prefix => Bound::Excluded(token),
            _ => Bound::Included(prefix),
        };
        let mut names: Vec<String> = objects
            .range::<str, _>((start, Bound::Unbounded))
            .map(|(name, _)| name)
            .take_while(|name| name.starts_with(prefix))
            .take(self.list_page_size + 1)
            .cloned()
            .collect();

        // If there is at least one more name, hand out a continuation token
        let next = if names.len() > self.list_page_size {
            names.truncate(self.list_page_size);
            names.last().cloned()
        } else {
            None
        };
        Ok(Listing { names, next })
    }
}
