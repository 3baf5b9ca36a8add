//! The set of live queries registered with a volume.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::query::LiveQuery;
use crate::types::{AttrType, EntryId};
use crate::volume::Node;

/// Registration handle returned by `LiveQueryRegistry::register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiveQueryId(u64);

/// Live queries of one volume.
///
/// Registration is safe from any thread. Updates evaluate a snapshot of the
/// registered queries outside the lock, so a query may deregister while an
/// update is being delivered.
#[derive(Debug, Default)]
pub struct LiveQueryRegistry {
    next_id: AtomicU64,
    queries: RwLock<FnvHashMap<LiveQueryId, Arc<LiveQuery>>>,
}

impl LiveQueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, query: Arc<LiveQuery>) -> LiveQueryId {
        let id = LiveQueryId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.queries.write().insert(id, query);
        log::debug!("registered live query {id:?}");
        id
    }

    pub fn deregister(&self, id: LiveQueryId) -> Option<Arc<LiveQuery>> {
        let removed = self.queries.write().remove(&id);
        if removed.is_some() {
            log::debug!("deregistered live query {id:?}");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.queries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<LiveQuery>> {
        self.queries.read().values().cloned().collect()
    }

    /// Reports an attribute change to every live query.
    pub fn update(
        &self,
        node: &dyn Node,
        attribute: &str,
        attr_type: AttrType,
        old: Option<&[u8]>,
        new: Option<&[u8]>,
    ) {
        for query in self.snapshot() {
            if let Err(error) = query.live_update(node, attribute, attr_type, old, new) {
                log::error!(
                    "live query {:?} failed on {attribute:?} change of {}: {error}",
                    query.expression().text(),
                    node.id()
                );
            }
        }
    }

    /// Reports a rename or move to every live query.
    pub fn update_rename_move(
        &self,
        node: &dyn Node,
        old_directory: EntryId,
        old_name: &str,
        new_directory: EntryId,
        new_name: &str,
    ) {
        for query in self.snapshot() {
            if let Err(error) =
                query.live_update_rename_move(node, old_directory, old_name, new_directory, new_name)
            {
                log::error!(
                    "live query {:?} failed on rename of {}: {error}",
                    query.expression().text(),
                    node.id()
                );
            }
        }
    }

    pub fn entry_created(&self, node: &dyn Node) {
        for query in self.snapshot() {
            if let Err(error) = query.entry_created(node) {
                log::error!(
                    "live query {:?} failed on creation of {}: {error}",
                    query.expression().text(),
                    node.id()
                );
            }
        }
    }

    pub fn entry_removed(&self, node: &dyn Node) {
        for query in self.snapshot() {
            if let Err(error) = query.entry_removed(node) {
                log::error!(
                    "live query {:?} failed on removal of {}: {error}",
                    query.expression().text(),
                    node.id()
                );
            }
        }
    }
}
