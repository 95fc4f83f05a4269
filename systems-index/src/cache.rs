//! In-memory cache of decoded nodes, keyed by offset.
//!
//! Entries are bounded by age, not by count: a background [`Sweeper`] drops
//! every entry that has not been read for longer than the configured maximum
//! age. The map sits behind a single reader/writer lock. Lookups take it in
//! shared mode and refresh the entry's access stamp through an atomic, so
//! the map itself is only mutated under the exclusive lock.

use hashbrown::HashMap;
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::node::TrieNode;

/// How often the serving process sweeps the cache.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct Entry {
    node: TrieNode,
    /// Milliseconds since the cache's epoch.
    last_access: AtomicU64,
}

pub struct NodeCache {
    entries: RwLock<HashMap<i64, Entry>>,
    epoch: Instant,
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    #[inline]
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Returns a copy of the cached node at `offset`, marking it as used.
    pub fn get(&self, offset: i64) -> Option<TrieNode> {
        let entries = self.entries.read();
        let entry = entries.get(&offset)?;
        entry.last_access.store(self.now(), Ordering::Relaxed);
        Some(entry.node)
    }

    pub fn put(&self, offset: i64, node: TrieNode) {
        let entry = Entry {
            node,
            last_access: AtomicU64::new(self.now()),
        };
        self.entries.write().insert(offset, entry);
    }

    /// Drops the entry for `offset`, if any.
    pub fn invalidate(&self, offset: i64) {
        self.entries.write().remove(&offset);
    }

    /// Evicts every entry that has gone unused for at least `max_age` and
    /// returns how many were removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let max_age = max_age.as_millis() as u64;
        let mut entries = self.entries.write();
        let now = self.now();
        let before = entries.len();
        entries.retain(|_, entry| {
            now.saturating_sub(entry.last_access.load(Ordering::Relaxed)) < max_age
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Background thread that sweeps a [`NodeCache`] on a fixed interval.
///
/// The thread keeps its own timer and never waits on request handling. It
/// stops when [`Sweeper::stop`] is called or the handle is dropped.
pub struct Sweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn(
        cache: Arc<NodeCache>,
        max_age: Duration,
        interval: Duration,
    ) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("node-cache-sweeper".into())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let start = Instant::now();
                        let evicted = cache.sweep(max_age);
                        tracing::info!(
                            evicted,
                            remaining = cache.len(),
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "swept node cache"
                        );
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("node cache sweeper panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
