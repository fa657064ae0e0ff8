//! An in-memory [`VersionedStore`] with controllable failures.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{Classify, ErrorKind, Versioned, VersionedStore};

/// An object held by [`MemoryStore`].
#[derive(Clone, Debug, PartialEq)]
pub struct Record<T> {
    pub name: String,
    pub resource_version: String,
    pub payload: T,
}

impl<T> Versioned for Record<T> {
    fn resource_version(&self) -> Option<&str> {
        Some(&self.resource_version)
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MemoryError {
    #[error("conflict on {name}, expected version {expected}, current {current}")]
    Conflict {
        name: String,
        expected: String,
        current: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("store unavailable")]
    Unavailable,
}

impl Classify for MemoryError {
    fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::Conflict { .. } => ErrorKind::Conflict,
            MemoryError::NotFound(_) => ErrorKind::NotFound,
            MemoryError::PermissionDenied => ErrorKind::PermissionDenied,
            MemoryError::Unavailable => ErrorKind::Transport,
        }
    }
}

struct Inner<T> {
    objects: HashMap<String, Record<T>>,
    last_version: u64,

    // writes that are rejected as if another writer got there first
    conflicts: usize,
    // errors returned by the next fetch or write, before anything else
    errors: VecDeque<MemoryError>,
}

impl<T> Inner<T> {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }
}

/// Compare-and-swap store keyed by name. Every committed write gets a new,
/// monotonically increasing resource version.
pub struct MemoryStore<T> {
    inner: Mutex<Inner<T>>,

    fetches: AtomicUsize,
    writes: AtomicUsize,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        MemoryStore {
            inner: Mutex::new(Inner {
                objects: HashMap::new(),
                last_version: 0,
                conflicts: 0,
                errors: VecDeque::new(),
            }),
            fetches: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or overwrite `name` unconditionally.
    pub fn insert(&self, name: impl Into<String>, payload: T) -> Record<T> {
        let name = name.into();
        let mut inner = self.lock();
        let record = Record {
            name: name.clone(),
            resource_version: inner.next_version(),
            payload,
        };

        inner.objects.insert(name, record.clone());
        record
    }

    pub fn get(&self, name: &str) -> Option<Record<T>> {
        self.lock().objects.get(name).cloned()
    }

    /// Reject the next `n` writes with a conflict. Each rejection also bumps
    /// the stored version, like a concurrent writer would.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().conflicts = n;
    }

    /// Return `err` from the next fetch or write.
    pub fn push_error(&self, err: MemoryError) {
        self.lock().errors.push_back(err);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T> VersionedStore for MemoryStore<T>
where
    T: Clone + Send + Sync,
{
    type Key = str;
    type Object = Record<T>;
    type Error = MemoryError;

    async fn fetch(&self, key: &str) -> Result<Record<T>, MemoryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.lock();
        if let Some(err) = inner.errors.pop_front() {
            return Err(err);
        }

        inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(key.to_string()))
    }

    async fn write(&self, object: Record<T>) -> Result<Record<T>, MemoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.lock();
        if let Some(err) = inner.errors.pop_front() {
            return Err(err);
        }

        if inner.conflicts > 0 {
            inner.conflicts -= 1;

            let version = inner.next_version();
            let stored = inner
                .objects
                .get_mut(&object.name)
                .ok_or_else(|| MemoryError::NotFound(object.name.clone()))?;
            stored.resource_version = version;

            return Err(MemoryError::Conflict {
                name: object.name,
                expected: object.resource_version,
                current: stored.resource_version.clone(),
            });
        }

        let current = match inner.objects.get(&object.name) {
            Some(stored) => stored.resource_version.clone(),
            None => return Err(MemoryError::NotFound(object.name)),
        };
        if current != object.resource_version {
            return Err(MemoryError::Conflict {
                name: object.name,
                expected: object.resource_version,
                current,
            });
        }

        let record = Record {
            resource_version: inner.next_version(),
            ..object
        };
        inner.objects.insert(record.name.clone(), record.clone());

        Ok(record)
    }
}
