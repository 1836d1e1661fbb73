//! RAII guard for directory entries
//!
//! The serving loop that installed an entry owns its guard. Dropping the
//! guard removes the entry it installed and wakes anyone waiting for the
//! entry to drain.

use super::{lock_slots, Slots};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Guard returned by [`super::Directory::insert`] and [`super::Directory::replace`]
pub struct RegistrationGuard<K, H>
where
    K: Eq + Hash + Clone + Debug,
{
    slots: Arc<Slots<K, H>>,
    directory: &'static str,
    key: K,
    generation: u64,
    handle: Arc<H>,
    /// Receivers observe closure of this sender once the guard is gone
    _drained: watch::Sender<()>,
}

impl<K, H> RegistrationGuard<K, H>
where
    K: Eq + Hash + Clone + Debug,
{
    pub(super) fn new(
        slots: Arc<Slots<K, H>>,
        directory: &'static str,
        key: K,
        generation: u64,
        handle: Arc<H>,
        drained: watch::Sender<()>,
    ) -> Self {
        RegistrationGuard {
            slots,
            directory,
            key,
            generation,
            handle,
            _drained: drained,
        }
    }

    /// Key this entry was installed under
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The registered handle
    pub fn handle(&self) -> &Arc<H> {
        &self.handle
    }
}

impl<K, H> Drop for RegistrationGuard<K, H>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        let ours = slots
            .get(&self.key)
            .map(|slot| slot.generation == self.generation)
            .unwrap_or(false);
        if ours {
            slots.remove(&self.key);
            debug!(directory = self.directory, key = ?self.key, "Entry removed");
        }
    }
}
