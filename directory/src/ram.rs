//! In-memory implementations of [SequentialWriter], [RandomReader], and
//! [MutualExclusionLock] that do not go through a page store.
//!
//! Useful for exercising code written against the capability traits without provisioning
//! a store.

use crate::{Error, MutualExclusionLock, RandomReader, SequentialWriter};
use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex},
};

/// A set of named files shared by every clone.
#[derive(Clone, Default)]
pub struct Files {
    files: Arc<Mutex<BTreeMap<String, Arc<Vec<u8>>>>>,
}

impl Files {
    /// Open a writer for `name`, replacing any existing content.
    pub fn create(&self, name: &str) -> Writer {
        self.files
            .lock()
            .unwrap()
            .insert(name.into(), Arc::new(Vec::new()));
        Writer {
            files: self.clone(),
            name: name.into(),
            buffer: Vec::new(),
            closed: false,
        }
    }

    /// Open a reader over the content of `name` as last flushed.
    ///
    /// Returns `None` if `name` does not exist.
    pub fn open(&self, name: &str) -> Option<Reader> {
        let data = self.files.lock().unwrap().get(name).cloned()?;
        Some(Reader {
            data,
            position: 0,
            closed: false,
        })
    }

    /// Remove `name`, returning whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.files.lock().unwrap().remove(name).is_some()
    }

    /// Names of every file.
    pub fn names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

/// Appends to a [Files] entry. Content becomes visible to new readers on flush.
pub struct Writer {
    files: Files,
    name: String,
    buffer: Vec<u8>,
    closed: bool,
}

impl Writer {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn publish(&self) {
        self.files
            .files
            .lock()
            .unwrap()
            .insert(self.name.clone(), Arc::new(self.buffer.clone()));
    }
}

impl SequentialWriter for Writer {
    async fn write_byte(&mut self, byte: u8) -> Result<(), Error> {
        self.ensure_open()?;
        self.buffer.push(byte);
        Ok(())
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.ensure_open()?;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.publish();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.publish();
        self.closed = true;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }
}

/// Reads a snapshot of a [Files] entry.
#[derive(Clone)]
pub struct Reader {
    data: Arc<Vec<u8>>,
    position: u64,
    closed: bool,
}

impl Reader {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn ensure_available(&self, requested: usize) -> Result<(), Error> {
        if self.position + requested as u64 > self.data.len() as u64 {
            return Err(Error::EndOfStream {
                position: self.position,
                requested,
                length: self.data.len() as u64,
            });
        }
        Ok(())
    }
}

impl RandomReader for Reader {
    async fn read_byte(&mut self) -> Result<u8, Error> {
        self.ensure_open()?;
        if self.data.is_empty() {
            return Ok(0);
        }
        self.ensure_available(1)?;
        let byte = self.data[self.position as usize];
        self.position += 1;
        Ok(byte)
    }

    async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.ensure_open()?;
        if self.data.is_empty() {
            buf.fill(0);
            return Ok(());
        }
        self.ensure_available(buf.len())?;
        let start = self.position as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        self.position += buf.len() as u64;
        Ok(())
    }

    async fn seek(&mut self, position: u64) -> Result<(), Error> {
        self.ensure_open()?;
        let length = self.data.len() as u64;
        if position > length {
            return Err(Error::SeekBeyondEnd { position, length });
        }
        self.position = position;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// A set of held lock names shared by every clone.
#[derive(Clone, Default)]
pub struct Locks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl Locks {
    /// Return a handle for `name`.
    pub fn lock(&self, name: &str) -> Lock {
        Lock {
            held: self.held.clone(),
            name: name.into(),
        }
    }
}

/// A lock held while its name is in the shared set.
pub struct Lock {
    held: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl MutualExclusionLock for Lock {
    async fn obtain(&self) -> Result<bool, Error> {
        Ok(self.held.lock().unwrap().insert(self.name.clone()))
    }

    async fn release(&self) -> Result<(), Error> {
        self.held.lock().unwrap().remove(&self.name);
        Ok(())
    }

    async fn is_locked(&self) -> Result<bool, Error> {
        Ok(self.held.lock().unwrap().contains(&self.name))
    }
}
