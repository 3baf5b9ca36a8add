//! Storage collaborator interfaces.
//!
//! The query engine does not own any on-disk structure. A volume hands it
//! index metadata, positioned index iterators and node handles; everything
//! else (locking, journaling, the index implementation) stays behind these
//! traits.

pub mod memory;

use crate::error::Result;
use crate::registry::LiveQueryRegistry;
use crate::types::{AttrType, EntryId, VolumeId};

pub use memory::{MemoryNode, MemoryVolume};

/// Metadata the planner scores an index with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexInfo {
    pub attr_type: AttrType,
    /// Fixed key size in bytes; 0 for variable length (string) keys.
    pub key_size: usize,
    /// Current size of the index in bytes.
    pub size: u64,
}

/// One step of an index iterator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub location: EntryId,
    /// 0 for a unique key; otherwise the 1-based position within the run of
    /// entries sharing this key.
    pub duplicate: u16,
}

/// A typed attribute buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeData {
    pub attr_type: AttrType,
    pub data: Vec<u8>,
}

impl AttributeData {
    pub fn new(attr_type: AttrType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            attr_type,
            data: data.into(),
        }
    }
}

/// An ordered iterator over one index, supporting duplicate keys.
pub trait IndexIterator {
    /// Positions the iterator at the first key greater than or equal to `key`.
    ///
    /// Returns whether an entry with exactly that key exists.
    fn find(&mut self, key: &[u8]) -> Result<bool>;

    /// Returns the next entry, or `None` once the index is exhausted.
    fn next_entry(&mut self) -> Result<Option<IndexEntry>>;

    /// Skips the rest of the duplicate run the last entry belongs to.
    fn skip_duplicates(&mut self);
}

/// Read access to a single filesystem entry.
pub trait Node {
    fn id(&self) -> EntryId;

    fn parent(&self) -> EntryId;

    fn name(&self) -> Result<String>;

    fn size(&self) -> i64;

    /// Modification time in index form, shifted left by `INODE_TIME_SHIFT`.
    fn last_modified(&self) -> i64;

    /// Looks up an attribute stored inline with the node.
    fn small_data(&self, attribute: &str) -> Option<AttributeData>;

    /// Reads up to `limit` bytes of a stored attribute.
    ///
    /// `Ok(None)` means the attribute does not exist; `Err` is a read failure.
    fn read_attribute(&self, attribute: &str, limit: usize) -> Result<Option<AttributeData>>;
}

/// A mounted volume as seen by the query engine.
pub trait Volume {
    fn id(&self) -> VolumeId;

    /// Index metadata for `attribute`, or `None` if it is not indexed.
    fn index_info(&self, attribute: &str) -> Option<IndexInfo>;

    /// Opens an iterator positioned at the start of the index for `attribute`.
    ///
    /// `Ok(None)` means the index (or its tree) does not exist.
    fn open_index(&self, attribute: &str) -> Result<Option<Box<dyn IndexIterator + '_>>>;

    fn get_node(&self, id: EntryId) -> Result<Box<dyn Node + '_>>;

    /// The set of live queries attribute changes must be reported to.
    fn live_queries(&self) -> &LiveQueryRegistry;
}
