//! Endpoint directory
//!
//! A keyed registry of live endpoint handles. The relay keeps three of
//! them: servers by device id, reverse clients by a monotonic index and
//! proxies by token.
//!
//! Entries are installed through [`Directory::insert`] or
//! [`Directory::replace`] and removed when the returned
//! [`RegistrationGuard`] is dropped. `replace` on an occupied key marks the
//! old entry as draining, evicts it and waits for its guard to go away
//! before installing the new one, so at most one handle is ever reachable
//! under a key.

mod guard;

pub use guard::RegistrationGuard;

use crate::error::RelayError;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

/// Reason given to a handle evicted by [`Directory::replace`]
pub const REPLACED: &str = "replaced by a new registration";

/// Something a directory entry can be forcibly closed through
pub trait Registrant: Send + Sync + 'static {
    /// Force the holder's session closed; its serving loop will then drop
    /// its guard.
    fn evict(&self, reason: &str);
}

struct Slot<H> {
    handle: Arc<H>,
    generation: u64,
    draining: bool,
    drained: watch::Receiver<()>,
}

type Slots<K, H> = Mutex<HashMap<K, Slot<H>>>;

fn lock_slots<K, H>(slots: &Slots<K, H>) -> MutexGuard<'_, HashMap<K, Slot<H>>> {
    // Nothing panics while holding the lock; a poisoned map is still consistent.
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keyed registry of endpoint handles
pub struct Directory<K, H>
where
    K: Eq + Hash + Clone + Debug,
{
    name: &'static str,
    slots: Arc<Slots<K, H>>,
    next_generation: AtomicU64,
}

impl<K, H> Directory<K, H>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    H: Registrant,
{
    /// Create an empty directory; `name` shows up in logs
    pub fn new(name: &'static str) -> Self {
        Directory {
            name,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Directory name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current handle for `key`, ignoring entries that are draining
    pub fn lookup(&self, key: &K) -> Option<Arc<H>> {
        lock_slots(&self.slots)
            .get(key)
            .filter(|slot| !slot.draining)
            .map(|slot| slot.handle.clone())
    }

    /// Install `handle` under a vacant `key`
    pub fn insert(&self, key: K, handle: Arc<H>) -> Result<RegistrationGuard<K, H>, RelayError> {
        let mut slots = lock_slots(&self.slots);
        if slots.contains_key(&key) {
            return Err(RelayError::Directory(format!(
                "{:?} already registered in {}",
                key, self.name
            )));
        }
        Ok(self.install(&mut slots, key, handle))
    }

    /// Install `handle` under `key`, evicting and draining any current holder first
    ///
    /// Concurrent replacements for one key leave a single survivor. Every
    /// holder that loses is evicted the same way.
    pub async fn replace(&self, key: K, handle: Arc<H>) -> RegistrationGuard<K, H> {
        loop {
            let (old, mut drained) = {
                let mut slots = lock_slots(&self.slots);
                match slots.get_mut(&key) {
                    None => {
                        let guard = self.install(&mut slots, key, handle);
                        return guard;
                    }
                    Some(slot) => {
                        slot.draining = true;
                        (slot.handle.clone(), slot.drained.clone())
                    }
                }
            };

            info!(directory = self.name, key = ?key, "Replacing existing entry");
            old.evict(REPLACED);
            // Resolves once the old guard's sender is dropped.
            let _ = drained.changed().await;
        }
    }

    /// Drop the entry for `key` regardless of which guard installed it
    pub fn remove(&self, key: &K) -> Option<Arc<H>> {
        let removed = lock_slots(&self.slots).remove(key).map(|slot| slot.handle);
        if removed.is_some() {
            debug!(directory = self.name, key = ?key, "Entry removed explicitly");
        }
        removed
    }

    /// Snapshot of every live handle
    pub fn handles(&self) -> Vec<Arc<H>> {
        lock_slots(&self.slots)
            .values()
            .filter(|slot| !slot.draining)
            .map(|slot| slot.handle.clone())
            .collect()
    }

    /// Number of entries, draining ones included
    pub fn len(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    /// Whether the directory holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn install(
        &self,
        slots: &mut HashMap<K, Slot<H>>,
        key: K,
        handle: Arc<H>,
    ) -> RegistrationGuard<K, H> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(());
        slots.insert(
            key.clone(),
            Slot {
                handle: handle.clone(),
                generation,
                draining: false,
                drained: rx,
            },
        );
        debug!(directory = self.name, key = ?key, generation, "Entry installed");
        RegistrationGuard::new(self.slots.clone(), self.name, key, generation, handle, tx)
    }
}
