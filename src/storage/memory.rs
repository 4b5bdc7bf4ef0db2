use super::{validate_id, Storage, DEFAULT_LIST_LIMIT};
use crate::error::StorageError;
use crate::metadata::Metadata;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

/// Bounded in-process store
///
/// Entries are kept in insertion order in an index-linked list with an id
/// lookup table. Storing appends at the back (replacing an earlier entry with
/// the same id), then evicts from the front while either the entry cap or the
/// byte cap is exceeded. A cap of zero disables that bound.
pub struct InMemoryStorage {
    inner: RwLock<Inner>,
    max_entries: usize,
    max_bytes: usize,
}

struct Entry {
    metadata: Arc<Metadata>,
    stored_at: SystemTime,
    bytes: usize,
}

struct Node {
    entry: Entry,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct Inner {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    by_id: HashMap<String, usize>,
    total_bytes: usize,
}

impl Inner {
    fn push_back(&mut self, entry: Entry) -> usize {
        let node = Node {
            entry,
            prev: self.tail,
            next: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                index
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        match self.tail {
            Some(tail) => {
                if let Some(node) = self.nodes[tail].as_mut() {
                    node.next = Some(index);
                }
            }
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        index
    }

    fn unlink(&mut self, index: usize) -> Option<Entry> {
        let node = self.nodes.get_mut(index)?.take()?;

        match node.prev {
            Some(prev) => {
                if let Some(p) = self.nodes[prev].as_mut() {
                    p.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(n) = self.nodes[next].as_mut() {
                    n.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }

        self.free.push(index);
        Some(node.entry)
    }

    fn remove(&mut self, index: usize) {
        if let Some(entry) = self.unlink(index) {
            self.by_id.remove(&entry.metadata.id);
            self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);
        }
    }

    fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index).and_then(Option::as_ref)
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

impl InMemoryStorage {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_entries,
            max_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the serialized sizes of all held records
    pub fn total_bytes(&self) -> usize {
        self.read().total_bytes
    }

    /// Store with an explicit stored-at time
    pub fn insert_at(&self, metadata: Arc<Metadata>, stored_at: SystemTime) -> Result<(), StorageError> {
        validate_id(&metadata.id)?;
        let bytes = serde_json::to_vec(metadata.as_ref())?.len();

        let mut inner = self.write();
        if let Some(index) = inner.by_id.get(&metadata.id).copied() {
            inner.remove(index);
        }

        let id = metadata.id.clone();
        let index = inner.push_back(Entry {
            metadata,
            stored_at,
            bytes,
        });
        inner.by_id.insert(id, index);
        inner.total_bytes += bytes;

        while (self.max_entries > 0 && inner.len() > self.max_entries)
            || (self.max_bytes > 0 && inner.total_bytes > self.max_bytes)
        {
            let Some(front) = inner.head else {
                break;
            };
            inner.remove(front);
        }

        Ok(())
    }

    /// Drop every record stored before `cutoff`
    pub fn cleanup_before(&self, cutoff: SystemTime) {
        let mut inner = self.write();
        let mut cursor = inner.head;
        while let Some(index) = cursor {
            let Some(node) = inner.node(index) else {
                break;
            };
            cursor = node.next;
            if node.entry.stored_at < cutoff {
                inner.remove(index);
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn store(&self, metadata: Arc<Metadata>) -> Result<(), StorageError> {
        self.insert_at(metadata, SystemTime::now())
    }

    async fn get(&self, id: &str) -> Result<Arc<Metadata>, StorageError> {
        let inner = self.read();
        inner
            .by_id
            .get(id)
            .and_then(|&index| inner.node(index))
            .map(|node| Arc::clone(&node.entry.metadata))
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn list(&self, limit: usize) -> Result<Vec<Arc<Metadata>>, StorageError> {
        let limit = match (limit, self.max_entries) {
            (0, 0) => DEFAULT_LIST_LIMIT,
            (0, max) => max,
            (limit, _) => limit,
        };

        let inner = self.read();
        let mut out = Vec::with_capacity(limit.min(inner.len()));
        let mut cursor = inner.tail;
        while let Some(index) = cursor {
            if out.len() >= limit {
                break;
            }
            let Some(node) = inner.node(index) else {
                break;
            };
            out.push(Arc::clone(&node.entry.metadata));
            cursor = node.prev;
        }
        Ok(out)
    }

    async fn cleanup(&self, max_age: Duration) -> Result<(), StorageError> {
        if max_age.is_zero() {
            return Ok(());
        }
        if let Some(cutoff) = SystemTime::now().checked_sub(max_age) {
            self.cleanup_before(cutoff);
        }
        Ok(())
    }
}
