//! In-memory volume.
//!
//! Keeps nodes in a hash map and every index as an ordered map from typed key
//! to the set of entries holding that key, so duplicate runs come out in
//! entry order. `name`, `size` and `last_modified` are indexed from the
//! start; other attributes once `create_index` is called for them.
//!
//! Writes update the indices under the state lock and report to the live
//! query registry after the lock is released.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;

use fnv::FnvHashMap;
use parking_lot::RwLock;

use super::{AttributeData, IndexEntry, IndexInfo, IndexIterator, Node, Volume};
use crate::error::{QueryError, Result};
use crate::query::TypedValue;
use crate::registry::LiveQueryRegistry;
use crate::types::{
    AttrType, EntryId, VolumeId, INODE_TIME_SHIFT, LAST_MODIFIED_ATTRIBUTE, MAX_INDEX_KEY_LENGTH,
    NAME_ATTRIBUTE, SIZE_ATTRIBUTE,
};

/// Attributes up to this many bytes are served from the small data area.
pub const SMALL_DATA_LIMIT: usize = 128;

/// Bytes an index occupies before it holds any keys.
const INDEX_HEADER_SIZE: u64 = 2048;
const INDEX_NODE_SIZE: u64 = 1024;
const KEYS_PER_INDEX_NODE: u64 = 64;

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryNode {
    id: EntryId,
    parent: EntryId,
    name: String,
    size: i64,
    /// Shifted by `INODE_TIME_SHIFT`, as the index stores it.
    last_modified: i64,
    attributes: BTreeMap<String, AttributeData>,
}

impl MemoryNode {
    pub fn new(id: EntryId, parent: EntryId, name: impl Into<String>) -> Self {
        Self {
            id,
            parent,
            name: name.into(),
            size: 0,
            last_modified: 0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    /// Sets the modification time in seconds.
    pub fn with_last_modified(mut self, seconds: i64) -> Self {
        self.last_modified = seconds << INODE_TIME_SHIFT;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, data: AttributeData) -> Self {
        self.attributes.insert(name.into(), data);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeData> {
        self.attributes.get(name)
    }

    /// Every value this node contributes to an index.
    fn index_values(&self) -> Vec<(&str, AttrType, Vec<u8>)> {
        let mut values = vec![
            (NAME_ATTRIBUTE, AttrType::String, self.name.as_bytes().to_vec()),
            (SIZE_ATTRIBUTE, AttrType::Int64, self.size.to_le_bytes().to_vec()),
            (
                LAST_MODIFIED_ATTRIBUTE,
                AttrType::Int64,
                self.last_modified.to_le_bytes().to_vec(),
            ),
        ];
        values.extend(
            self.attributes
                .iter()
                .map(|(name, data)| (name.as_str(), data.attr_type, data.data.clone())),
        );
        values
    }
}

impl Node for MemoryNode {
    fn id(&self) -> EntryId {
        self.id
    }

    fn parent(&self) -> EntryId {
        self.parent
    }

    fn name(&self) -> Result<String> {
        Ok(self.name.clone())
    }

    fn size(&self) -> i64 {
        self.size
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }

    fn small_data(&self, attribute: &str) -> Option<AttributeData> {
        self.attributes
            .get(attribute)
            .filter(|data| data.data.len() <= SMALL_DATA_LIMIT)
            .cloned()
    }

    fn read_attribute(&self, attribute: &str, limit: usize) -> Result<Option<AttributeData>> {
        Ok(self.attributes.get(attribute).map(|stored| {
            let end = stored.data.len().min(limit);
            AttributeData::new(stored.attr_type, &stored.data[..end])
        }))
    }
}

// ---------------------------------------------------------------------------
// Indices
// ---------------------------------------------------------------------------

/// Index key ordered the way the query engine compares values.
///
/// Float keys are stored with `-0.0` folded into `0.0` and every NaN folded
/// into the positive quiet NaN, so the total order below sorts them the way
/// `TypedValue::compare` does.
#[derive(Debug, Clone)]
struct IndexKey(TypedValue);

impl IndexKey {
    fn new(value: TypedValue) -> Self {
        Self(match value {
            TypedValue::Float(value) if value.is_nan() => TypedValue::Float(f32::NAN),
            TypedValue::Float(value) if value == 0.0 => TypedValue::Float(0.0),
            TypedValue::Double(value) if value.is_nan() => TypedValue::Double(f64::NAN),
            TypedValue::Double(value) if value == 0.0 => TypedValue::Double(0.0),
            other => other,
        })
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (TypedValue::Float(a), TypedValue::Float(b)) => a.total_cmp(b),
            (TypedValue::Double(a), TypedValue::Double(b)) => a.total_cmp(b),
            (a, b) => a.compare(b),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

#[derive(Debug, Clone)]
struct MemoryIndex {
    attr_type: AttrType,
    entries: BTreeMap<IndexKey, BTreeSet<EntryId>>,
}

impl MemoryIndex {
    fn new(attr_type: AttrType) -> Self {
        Self {
            attr_type,
            entries: BTreeMap::new(),
        }
    }

    fn key(&self, attr_type: AttrType, data: &[u8]) -> Option<IndexKey> {
        if attr_type != self.attr_type {
            return None;
        }
        TypedValue::from_key(attr_type, data).map(IndexKey::new)
    }

    fn insert(&mut self, attr_type: AttrType, data: &[u8], id: EntryId) {
        if let Some(key) = self.key(attr_type, data) {
            self.entries.entry(key).or_default().insert(id);
        }
    }

    fn remove(&mut self, attr_type: AttrType, data: &[u8], id: EntryId) {
        let Some(key) = self.key(attr_type, data) else {
            return;
        };
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    fn len(&self) -> u64 {
        self.entries.values().map(|ids| ids.len() as u64).sum()
    }

    fn info(&self) -> IndexInfo {
        IndexInfo {
            attr_type: self.attr_type,
            key_size: self.attr_type.fixed_key_size(),
            size: INDEX_HEADER_SIZE + self.len().div_ceil(KEYS_PER_INDEX_NODE) * INDEX_NODE_SIZE,
        }
    }
}

/// Where an iterator continues from.
#[derive(Debug, Clone)]
enum Position {
    Start,
    AtOrAfter(IndexKey),
    After { key: IndexKey, last: EntryId },
    PastKey(IndexKey),
}

/// Iterator over one index of a `MemoryVolume`.
///
/// Holds no lock between calls; every step looks the index up again, so
/// concurrent writes show up in later steps.
struct MemoryIndexIterator<'a> {
    volume: &'a MemoryVolume,
    attribute: String,
    position: Position,
}

impl IndexIterator for MemoryIndexIterator<'_> {
    fn find(&mut self, key: &[u8]) -> Result<bool> {
        let state = self.volume.state.read();
        let index = state
            .indices
            .get(&self.attribute)
            .ok_or_else(|| QueryError::Index(format!("index {:?} was removed", self.attribute)))?;
        let key = TypedValue::from_key(index.attr_type, key)
            .map(IndexKey::new)
            .ok_or_else(|| {
                QueryError::Index(format!(
                    "search key does not fit index {:?} of type {:?}",
                    self.attribute, index.attr_type
                ))
            })?;

        let found = index.entries.contains_key(&key);
        self.position = Position::AtOrAfter(key);
        Ok(found)
    }

    fn next_entry(&mut self) -> Result<Option<IndexEntry>> {
        let state = self.volume.state.read();
        let Some(index) = state.indices.get(&self.attribute) else {
            log::warn!("index {:?} disappeared during iteration", self.attribute);
            return Ok(None);
        };

        let next = match &self.position {
            Position::Start => first_entry(index, (Bound::Unbounded, Bound::Unbounded)),
            Position::AtOrAfter(key) => {
                first_entry(index, (Bound::Included(key), Bound::Unbounded))
            }
            Position::PastKey(key) => first_entry(index, (Bound::Excluded(key), Bound::Unbounded)),
            Position::After { key, last } => index
                .entries
                .get_key_value(key)
                .and_then(|(stored, ids)| {
                    ids.range((Bound::Excluded(*last), Bound::Unbounded))
                        .next()
                        .map(|id| (stored, ids, *id))
                })
                .or_else(|| first_entry(index, (Bound::Excluded(key), Bound::Unbounded))),
        };

        let Some((key, ids, location)) = next else {
            return Ok(None);
        };

        let duplicate = if ids.len() == 1 {
            0
        } else {
            u16::try_from(ids.range(..=location).count()).unwrap_or(u16::MAX)
        };
        let entry = IndexEntry {
            key: key.0.to_key(),
            location,
            duplicate,
        };
        self.position = Position::After {
            key: key.clone(),
            last: location,
        };
        Ok(Some(entry))
    }

    fn skip_duplicates(&mut self) {
        if let Position::After { key, .. } = &self.position {
            self.position = Position::PastKey(key.clone());
        }
    }
}

type IndexRange<'k> = (Bound<&'k IndexKey>, Bound<&'k IndexKey>);

/// First entry of the first non-empty key in `range`.
fn first_entry<'a>(
    index: &'a MemoryIndex,
    range: IndexRange<'_>,
) -> Option<(&'a IndexKey, &'a BTreeSet<EntryId>, EntryId)> {
    index
        .entries
        .range(range)
        .find_map(|(key, ids)| ids.first().map(|id| (key, ids, *id)))
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

struct VolumeState {
    nodes: FnvHashMap<EntryId, MemoryNode>,
    indices: BTreeMap<String, MemoryIndex>,
    next_id: u64,
}

impl VolumeState {
    fn node(&self, id: EntryId) -> Result<&MemoryNode> {
        self.nodes.get(&id).ok_or(QueryError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: EntryId) -> Result<&mut MemoryNode> {
        self.nodes.get_mut(&id).ok_or(QueryError::NodeNotFound(id))
    }

    fn index_insert(&mut self, attribute: &str, attr_type: AttrType, data: &[u8], id: EntryId) {
        if let Some(index) = self.indices.get_mut(attribute) {
            index.insert(attr_type, data, id);
        }
    }

    fn index_remove(&mut self, attribute: &str, attr_type: AttrType, data: &[u8], id: EntryId) {
        if let Some(index) = self.indices.get_mut(attribute) {
            index.remove(attr_type, data, id);
        }
    }
}

/// A volume held entirely in memory.
pub struct MemoryVolume {
    id: VolumeId,
    state: RwLock<VolumeState>,
    live_queries: LiveQueryRegistry,
}

impl MemoryVolume {
    /// Entry id of the root directory. The root is not indexed.
    pub const ROOT: EntryId = EntryId::new(1);

    pub fn new(id: VolumeId) -> Self {
        let mut nodes = FnvHashMap::default();
        nodes.insert(Self::ROOT, MemoryNode::new(Self::ROOT, Self::ROOT, "."));

        let indices = [
            (NAME_ATTRIBUTE, AttrType::String),
            (SIZE_ATTRIBUTE, AttrType::Int64),
            (LAST_MODIFIED_ATTRIBUTE, AttrType::Int64),
        ]
        .into_iter()
        .map(|(name, attr_type)| (name.to_string(), MemoryIndex::new(attr_type)))
        .collect();

        Self {
            id,
            state: RwLock::new(VolumeState {
                nodes,
                indices,
                next_id: Self::ROOT.get() + 1,
            }),
            live_queries: LiveQueryRegistry::new(),
        }
    }

    pub fn node(&self, id: EntryId) -> Option<MemoryNode> {
        self.state.read().nodes.get(&id).cloned()
    }

    /// Number of entries, the root included.
    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates an index and fills it from the existing entries.
    pub fn create_index(&self, attribute: &str, attr_type: AttrType) -> Result<()> {
        validate_attribute_name(attribute)?;
        if attr_type.comparable().is_none() {
            return Err(QueryError::InvalidInput(format!(
                "type {:#010x} cannot be indexed",
                attr_type.code()
            )));
        }

        let mut state = self.state.write();
        if let Some(existing) = state.indices.get(attribute) {
            if existing.attr_type == attr_type {
                return Ok(());
            }
            return Err(QueryError::InvalidInput(format!(
                "index {attribute:?} already exists with type {:?}",
                existing.attr_type
            )));
        }

        let mut index = MemoryIndex::new(attr_type);
        for node in state.nodes.values().filter(|node| node.id != Self::ROOT) {
            for (name, ty, data) in node.index_values() {
                if name == attribute {
                    index.insert(ty, &data, node.id);
                }
            }
        }
        log::debug!("created index {attribute:?} with {} entries", index.len());
        state.indices.insert(attribute.to_string(), index);
        Ok(())
    }

    /// Drops an index; returns whether it existed.
    pub fn remove_index(&self, attribute: &str) -> bool {
        self.state.write().indices.remove(attribute).is_some()
    }

    pub fn create_entry(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        validate_entry_name(name)?;

        let node = {
            let mut state = self.state.write();
            state.node(parent)?;

            let id = EntryId::new(state.next_id);
            state.next_id += 1;
            let node = MemoryNode::new(id, parent, name);
            for (attribute, attr_type, data) in node.index_values() {
                state.index_insert(attribute, attr_type, &data, id);
            }
            state.nodes.insert(id, node.clone());
            node
        };

        self.live_queries.entry_created(&node);
        Ok(node.id)
    }

    pub fn set_size(&self, id: EntryId, size: i64) -> Result<()> {
        self.update_indexed(id, SIZE_ATTRIBUTE, |node| {
            let old = std::mem::replace(&mut node.size, size);
            ValueChange::int64(old, size)
        })?;
        Ok(())
    }

    /// Sets the modification time in seconds.
    pub fn set_last_modified(&self, id: EntryId, seconds: i64) -> Result<()> {
        let raw = seconds << INODE_TIME_SHIFT;
        self.update_indexed(id, LAST_MODIFIED_ATTRIBUTE, |node| {
            let old = std::mem::replace(&mut node.last_modified, raw);
            ValueChange::int64(old, raw)
        })?;
        Ok(())
    }

    /// Writes a stored attribute. `name`, `size` and `last_modified` are
    /// reserved.
    pub fn write_attribute(&self, id: EntryId, attribute: &str, data: AttributeData) -> Result<()> {
        validate_attribute_name(attribute)?;
        if is_reserved(attribute) {
            return Err(QueryError::InvalidInput(format!(
                "attribute {attribute:?} cannot be written directly"
            )));
        }

        self.update_indexed(id, attribute, |node| ValueChange {
            old: node.attributes.insert(attribute.to_string(), data.clone()),
            new: Some(data),
        })?;
        Ok(())
    }

    /// Removes a stored attribute; returns whether it existed.
    pub fn remove_attribute(&self, id: EntryId, attribute: &str) -> Result<bool> {
        self.update_indexed(id, attribute, |node| ValueChange {
            old: node.attributes.remove(attribute),
            new: None,
        })
    }

    /// Renames and/or moves an entry.
    ///
    /// Live queries see the name change like any attribute write, then the
    /// rename or move itself.
    pub fn rename(&self, id: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        validate_entry_name(new_name)?;
        if id == Self::ROOT {
            return Err(QueryError::InvalidInput("the root cannot be renamed".to_string()));
        }

        let (node, old_parent, old_name) = {
            let mut state = self.state.write();
            state.node(new_parent)?;
            let node = state.node_mut(id)?;
            let old_parent = std::mem::replace(&mut node.parent, new_parent);
            let old_name = std::mem::replace(&mut node.name, new_name.to_string());
            let snapshot = node.clone();

            state.index_remove(NAME_ATTRIBUTE, AttrType::String, old_name.as_bytes(), id);
            state.index_insert(NAME_ATTRIBUTE, AttrType::String, new_name.as_bytes(), id);
            (snapshot, old_parent, old_name)
        };

        if old_name != new_name {
            self.live_queries.update(
                &node,
                NAME_ATTRIBUTE,
                AttrType::String,
                Some(old_name.as_bytes()),
                Some(new_name.as_bytes()),
            );
        }
        self.live_queries
            .update_rename_move(&node, old_parent, &old_name, new_parent, new_name);
        Ok(())
    }

    /// Deletes an entry without children.
    pub fn remove_entry(&self, id: EntryId) -> Result<()> {
        if id == Self::ROOT {
            return Err(QueryError::InvalidInput("the root cannot be removed".to_string()));
        }

        let node = {
            let mut state = self.state.write();
            state.node(id)?;
            if state
                .nodes
                .values()
                .any(|node| node.parent == id && node.id != id)
            {
                return Err(QueryError::InvalidInput(format!("{id} is not empty")));
            }

            let node = state.nodes.remove(&id).ok_or(QueryError::NodeNotFound(id))?;
            for (attribute, attr_type, data) in node.index_values() {
                state.index_remove(attribute, attr_type, &data, id);
            }
            node
        };

        self.live_queries.entry_removed(&node);
        Ok(())
    }

    /// Applies `update` to a node and moves the node's key in the index of
    /// `attribute` from the old value to the new one, then reports the change
    /// to live queries. Returns false if there was nothing to change.
    fn update_indexed(
        &self,
        id: EntryId,
        attribute: &str,
        update: impl FnOnce(&mut MemoryNode) -> ValueChange,
    ) -> Result<bool> {
        let (node, change) = {
            let mut state = self.state.write();
            let node = state.node_mut(id)?;
            let change = update(node);
            let snapshot = node.clone();

            if let Some(old) = &change.old {
                state.index_remove(attribute, old.attr_type, &old.data, id);
            }
            if let Some(new) = &change.new {
                state.index_insert(attribute, new.attr_type, &new.data, id);
            }
            (snapshot, change)
        };

        let Some(attr_type) = change
            .new
            .as_ref()
            .or(change.old.as_ref())
            .map(|data| data.attr_type)
        else {
            return Ok(false);
        };
        self.live_queries.update(
            &node,
            attribute,
            attr_type,
            change.old.as_ref().map(|data| data.data.as_slice()),
            change.new.as_ref().map(|data| data.data.as_slice()),
        );
        Ok(true)
    }
}

/// Old and new value of one attribute write.
struct ValueChange {
    old: Option<AttributeData>,
    new: Option<AttributeData>,
}

impl ValueChange {
    fn int64(old: i64, new: i64) -> Self {
        Self {
            old: Some(AttributeData::new(AttrType::Int64, old.to_le_bytes())),
            new: Some(AttributeData::new(AttrType::Int64, new.to_le_bytes())),
        }
    }
}

fn is_reserved(attribute: &str) -> bool {
    matches!(
        attribute,
        NAME_ATTRIBUTE | SIZE_ATTRIBUTE | LAST_MODIFIED_ATTRIBUTE
    )
}

fn validate_attribute_name(attribute: &str) -> Result<()> {
    if attribute.is_empty() || attribute.len() > MAX_INDEX_KEY_LENGTH {
        return Err(QueryError::InvalidInput(format!(
            "attribute name must be 1 to {MAX_INDEX_KEY_LENGTH} bytes"
        )));
    }
    Ok(())
}

fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_INDEX_KEY_LENGTH || name.contains(['/', '\0']) {
        return Err(QueryError::InvalidInput(format!("invalid entry name {name:?}")));
    }
    Ok(())
}

impl Volume for MemoryVolume {
    fn id(&self) -> VolumeId {
        self.id
    }

    fn index_info(&self, attribute: &str) -> Option<IndexInfo> {
        self.state.read().indices.get(attribute).map(MemoryIndex::info)
    }

    fn open_index(&self, attribute: &str) -> Result<Option<Box<dyn IndexIterator + '_>>> {
        if !self.state.read().indices.contains_key(attribute) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryIndexIterator {
            volume: self,
            attribute: attribute.to_string(),
            position: Position::Start,
        })))
    }

    fn get_node(&self, id: EntryId) -> Result<Box<dyn Node + '_>> {
        let node = self.state.read().node(id)?.clone();
        Ok(Box::new(node))
    }

    fn live_queries(&self) -> &LiveQueryRegistry {
        &self.live_queries
    }
}

impl fmt::Debug for MemoryVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryVolume")
            .field("id", &self.id)
            .field("nodes", &state.nodes.len())
            .field("indices", &state.indices.keys().collect::<Vec<_>>())
            .field("live_queries", &self.live_queries.len())
            .finish()
    }
}
