//! Durable client-side key/value storage.
//!
//! The browser client keeps its session in local storage; natively the same
//! role is played by [`FileStorage`]. [`MemoryStorage`] covers tests and
//! sessions that must not outlive the process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::Error;

/// String-valued key/value storage.
///
/// Calls are synchronous: a session mutation is written through before the
/// mutating call returns.
pub trait Storage: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backing medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the value cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the key cannot be removed.
    fn remove(&self, key: &str) -> Result<(), Error>;

    /// Removes several keys in one write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if any key cannot be removed.
    fn remove_all(&self, keys: &[&str]) -> Result<(), Error> {
        keys.iter().try_for_each(|key| self.remove(key))
    }

    /// Applies several writes as one: `Some` sets the key, `None` removes it.
    ///
    /// Either every change lands or none does. The default implementation
    /// writes key by key and restores the earlier values when a write fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the changes cannot be persisted.
    fn write_all(&self, changes: &[(&str, Option<&str>)]) -> Result<(), Error> {
        let previous = changes
            .iter()
            .map(|(key, _)| Ok::<_, Error>((*key, self.get(key)?)))
            .collect::<Result<Vec<_>, Error>>()?;

        for (applied, (key, value)) in changes.iter().enumerate() {
            let written = match value {
                Some(value) => self.set(key, value),
                None => self.remove(key),
            };
            if let Err(e) = written {
                for (key, value) in previous[..applied].iter().rev() {
                    let restored = match value {
                        Some(value) => self.set(key, value),
                        None => self.remove(key),
                    };
                    if let Err(undo) = restored {
                        tracing::error!(key = *key, error = %undo, "Failed to roll back storage write");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

fn apply(entries: &mut BTreeMap<String, String>, changes: &[(&str, Option<&str>)]) {
    for (key, value) in changes {
        match value {
            Some(value) => entries.insert((*key).to_owned(), (*value).to_owned()),
            None => entries.remove(*key),
        };
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        lock(&self.entries).insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), Error> {
        let mut entries = lock(&self.entries);
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }

    fn write_all(&self, changes: &[(&str, Option<&str>)]) -> Result<(), Error> {
        apply(&mut lock(&self.entries), changes);
        Ok(())
    }
}

/// JSON object on disk, rewritten in full on every mutation.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Opens (or prepares to create) the storage file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file exists but is unreadable or
    /// not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(Error::Storage(format!("{}: {e}", path.display()))),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| Error::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| Error::Storage(format!("{}: {e}", self.path.display())))
    }
}

impl FileStorage {
    /// Flushes `changes` applied to a copy of the map; the copy replaces
    /// the in-memory map only once it is on disk.
    fn commit(&self, changes: &[(&str, Option<&str>)]) -> Result<(), Error> {
        let mut entries = lock(&self.entries);
        let mut next = entries.clone();
        apply(&mut next, changes);
        if next == *entries {
            return Ok(());
        }
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.commit(&[(key, Some(value))])
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.commit(&[(key, None)])
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), Error> {
        let changes: Vec<_> = keys.iter().map(|key| (*key, None)).collect();
        self.commit(&changes)
    }

    fn write_all(&self, changes: &[(&str, Option<&str>)]) -> Result<(), Error> {
        self.commit(changes)
    }
}
