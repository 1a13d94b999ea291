//! Bounded parse-result cache
//!
//! Parsed specs are keyed by the SHA-256 of the document content. The cache
//! holds at most `capacity` entries and evicts the least recently used.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::Spec;
use crate::external::DocumentParser;

/// Hex SHA-256 of document content
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
struct Entries {
    specs: HashMap<String, Spec>,
    /// Keys from least to most recently used
    order: VecDeque<String>,
}

impl Entries {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key)
            && let Some(k) = self.order.remove(pos)
        {
            self.order.push_back(k);
        }
    }
}

#[derive(Debug)]
pub struct ParseCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl ParseCache {
    /// A capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        debug!(%capacity, "ParseCache::new: called");
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached spec for this document content, marking it most recently used
    pub fn get(&self, content: &str) -> Option<Spec> {
        let key = content_hash(content);
        let mut entries = self.lock();
        let spec = entries.specs.get(&key).cloned()?;
        entries.touch(&key);
        Some(spec)
    }

    pub fn insert(&self, content: &str, spec: Spec) {
        let key = content_hash(content);
        let mut entries = self.lock();
        if entries.specs.insert(key.clone(), spec).is_some() {
            entries.touch(&key);
            return;
        }
        entries.order.push_back(key);
        while entries.specs.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            debug!(key = %oldest, "ParseCache::insert: evicting");
            entries.specs.remove(&oldest);
        }
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.specs.clear();
        entries.order.clear();
    }
}

/// Wraps a parser so identical documents are parsed once
pub struct CachingParser {
    inner: Arc<dyn DocumentParser>,
    cache: Arc<ParseCache>,
}

impl CachingParser {
    pub fn new(inner: Arc<dyn DocumentParser>, cache: Arc<ParseCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl DocumentParser for CachingParser {
    async fn parse(&self, document: &str) -> eyre::Result<Spec> {
        if let Some(spec) = self.cache.get(document) {
            debug!(spec = %spec.name, "CachingParser::parse: cache hit");
            return Ok(spec);
        }
        let spec = self.inner.parse(document).await?;
        self.cache.insert(document, spec.clone());
        Ok(spec)
    }
}
