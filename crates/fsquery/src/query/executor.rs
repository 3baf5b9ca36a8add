//! Query sessions.
//!
//! A `Query` pulls matching entries out of a volume one at a time. It scans
//! the planned equations in order; every candidate an index yields is checked
//! against the AND siblings its equation does not cover before it is
//! returned.

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use fnv::FnvHashSet;

use super::equation::CompareOp;
use super::expression::{Expression, TermId};
use super::live::LiveQuery;
use super::pattern;
use super::planner::{self, Scores};
use super::value::TypedValue;
use crate::error::{QueryError, Result};
use crate::notify::QueryListener;
use crate::registry::LiveQueryId;
use crate::types::{AttrType, DirEntry, EntryId, QueryFlags, INODE_TIME_SHIFT, NAME_ATTRIBUTE};
use crate::volume::{IndexIterator, Volume};

/// A query evaluation session over one volume.
///
/// Not synchronized: one caller pulls from a `Query` at a time. A live query
/// stays registered with the volume until the session is dropped.
pub struct Query<'v> {
    volume: &'v dyn Volume,
    expression: Arc<Expression>,
    flags: QueryFlags,
    scores: Scores,
    stack: Vec<TermId>,
    current: Option<ActiveLeaf<'v>>,
    seen: Option<FnvHashSet<EntryId>>,
    live: Option<Arc<LiveQuery>>,
    registration: Option<LiveQueryId>,
}

/// The equation currently being scanned and its positioned iterator.
struct ActiveLeaf<'v> {
    term: TermId,
    iterator: Box<dyn IndexIterator + 'v>,
    /// False when the leaf scans the name index in place of its own.
    has_index: bool,
    attr_type: AttrType,
    value: TypedValue,
}

impl<'v> Query<'v> {
    /// Plans `expression` against `volume`.
    ///
    /// Fails if the expression is invalid. With `QueryFlags::LIVE` the query
    /// registers itself right away, without a listener until one is set.
    pub fn new(
        volume: &'v dyn Volume,
        expression: impl Into<Arc<Expression>>,
        flags: QueryFlags,
    ) -> Result<Self> {
        let expression = expression.into();
        expression.init_check()?;

        let scores = Scores::calculate(&expression, volume);
        let seen = expression.has_or().then(FnvHashSet::default);
        let mut query = Self {
            volume,
            expression,
            flags: flags.difference(QueryFlags::LIVE),
            scores,
            stack: Vec::new(),
            current: None,
            seen,
            live: None,
            registration: None,
        };
        query.rewind();
        if flags.contains(QueryFlags::LIVE) {
            query.enable_live(None);
        }

        log::debug!(
            "query on volume {} planned {} leaves for {}",
            volume.id().get(),
            query.stack.len(),
            query.expression
        );
        Ok(query)
    }

    /// Parses `text` and plans it.
    pub fn parse(volume: &'v dyn Volume, text: &str, flags: QueryFlags) -> Result<Self> {
        Self::new(volume, Expression::parse(text), flags)
    }

    /// Creates a live query that reports changes to `listener`.
    pub fn with_listener(
        volume: &'v dyn Volume,
        expression: impl Into<Arc<Expression>>,
        flags: QueryFlags,
        listener: QueryListener,
    ) -> Result<Self> {
        let mut query = Self::new(volume, expression, flags.difference(QueryFlags::LIVE))?;
        query.set_live_mode(listener);
        Ok(query)
    }

    pub fn expression(&self) -> &Arc<Expression> {
        &self.expression
    }

    pub fn flags(&self) -> QueryFlags {
        self.flags
    }

    pub fn is_live(&self) -> bool {
        self.flags.contains(QueryFlags::LIVE)
    }

    pub fn scores(&self) -> &Scores {
        &self.scores
    }

    /// Makes the query live, or replaces the listener of a live query.
    pub fn set_live_mode(&mut self, listener: QueryListener) {
        match &self.live {
            Some(live) => live.set_listener(Some(listener)),
            None => self.enable_live(Some(listener)),
        }
    }

    fn enable_live(&mut self, listener: Option<QueryListener>) {
        self.flags |= QueryFlags::LIVE;
        let live = Arc::new(LiveQuery::new(
            Arc::clone(&self.expression),
            self.volume.id(),
            self.flags,
            listener,
        ));
        self.registration = Some(self.volume.live_queries().register(Arc::clone(&live)));
        self.live = Some(live);
    }

    /// Restarts the scan from the first planned equation.
    pub fn rewind(&mut self) {
        self.stack = planner::unroll(&self.expression, &self.scores);
        self.current = None;
        if let Some(seen) = &mut self.seen {
            seen.clear();
        }
    }

    /// Returns the next matching entry, or `None` once every leaf is
    /// exhausted.
    pub fn get_next_entry(&mut self) -> Result<Option<DirEntry>> {
        loop {
            let Some(leaf) = self.current.as_mut() else {
                let Some(term) = self.stack.pop() else {
                    return Ok(None);
                };
                self.current = self.prepare_leaf(term)?;
                continue;
            };

            match next_matching(self.volume, &self.expression, leaf, self.seen.as_mut())? {
                Some(entry) => return Ok(Some(entry)),
                None => self.current = None,
            }
        }
    }

    /// Opens and positions the index iterator for one equation.
    ///
    /// `Ok(None)` skips the equation: no usable index, or nothing in the
    /// index can match.
    fn prepare_leaf(&self, term: TermId) -> Result<Option<ActiveLeaf<'v>>> {
        let equation = self.expression.equation(term).ok_or_else(|| {
            QueryError::Internal(format!("planned term {term:?} is not an equation"))
        })?;
        let attribute = equation.attribute();
        let op = equation.op();

        let own_index = self.volume.index_info(attribute);
        if own_index.is_none() && !self.flags.contains(QueryFlags::QUERY_NON_INDEXED) {
            log::trace!("skipping {equation}: attribute is not indexed");
            return Ok(None);
        }

        let (index_name, has_index) = match own_index {
            Some(_) if op != Some(CompareOp::NotEqual) => (attribute, true),
            _ => {
                if self.volume.index_info(NAME_ATTRIBUTE).is_none() {
                    log::trace!("skipping {equation}: volume has no name index");
                    return Ok(None);
                }
                (NAME_ATTRIBUTE, false)
            }
        };
        let attr_type = own_index.map_or(AttrType::String, |info| info.attr_type);

        let value = equation
            .convert(attr_type)
            .ok_or_else(|| QueryError::UnsupportedType {
                attribute: attribute.to_string(),
                code: attr_type.code(),
            })?;

        let Some(mut iterator) = self.volume.open_index(index_name)? else {
            log::trace!("skipping {equation}: index {index_name:?} has no tree");
            return Ok(None);
        };

        let is_pattern = equation.uses_pattern(&value);
        let seeks = has_index
            && (is_pattern
                || matches!(
                    op,
                    Some(
                        CompareOp::Equal
                            | CompareOp::GreaterThan
                            | CompareOp::GreaterThanOrEqual
                    )
                ));

        if seeks {
            let key_size = own_index.map_or(0, |info| info.key_size);
            let key = if equation.is_special_time() {
                value
                    .as_i64()
                    .map(|time| (time << INODE_TIME_SHIFT).to_le_bytes().to_vec())
            } else if is_pattern {
                let prefix = value.as_str().map_or(0, pattern::fixed_prefix_len);
                (prefix > 0).then(|| value.to_key()[..prefix].to_vec())
            } else if key_size == 0 {
                match &value {
                    TypedValue::String(text) if text.is_empty() => Some(vec![0]),
                    TypedValue::String(_) => Some(value.to_key()),
                    _ => {
                        log::trace!("skipping {equation}: variable size key for a fixed type");
                        return Ok(None);
                    }
                }
            } else {
                Some(value.to_key())
            };

            if let Some(key) = key {
                let found = iterator.find(&key)?;
                let exact =
                    op == Some(CompareOp::Equal) && !is_pattern && !equation.is_special_time();
                if exact && !found {
                    log::trace!("skipping {equation}: key not in index");
                    return Ok(None);
                }
            }
        }

        log::trace!("scanning {equation} through index {index_name:?} (indexed: {has_index})");
        Ok(Some(ActiveLeaf {
            term,
            iterator,
            has_index,
            attr_type,
            value,
        }))
    }
}

/// Pulls candidates from the active leaf until one matches the whole
/// expression; `None` when the leaf is exhausted.
fn next_matching(
    volume: &dyn Volume,
    expression: &Expression,
    leaf: &mut ActiveLeaf<'_>,
    mut seen: Option<&mut FnvHashSet<EntryId>>,
) -> Result<Option<DirEntry>> {
    let equation = expression.equation(leaf.term).ok_or_else(|| {
        QueryError::Internal(format!("active term {:?} is not an equation", leaf.term))
    })?;
    let op = equation.op();
    let is_pattern = equation.uses_pattern(&leaf.value);

    while let Some(entry) = leaf.iterator.next_entry()? {
        if leaf.has_index
            && entry.duplicate < 2
            && !equation.compare_to(&leaf.value, leaf.attr_type, &entry.key)
        {
            let bounded = matches!(op, Some(CompareOp::LessThan | CompareOp::LessThanOrEqual))
                || (op == Some(CompareOp::Equal) && !is_pattern);
            if bounded {
                return Ok(None);
            }
            if entry.duplicate > 0 {
                leaf.iterator.skip_duplicates();
            }
            continue;
        }

        let node = match volume.get_node(entry.location) {
            Ok(node) => node,
            Err(error) => {
                log::warn!(
                    "index entry for {:?} points at {}, which cannot be loaded: {error}",
                    equation.attribute(),
                    entry.location
                );
                continue;
            }
        };

        if !leaf.has_index && !expression.matches(leaf.term, node.as_ref(), None)? {
            continue;
        }

        let mut matched = true;
        let mut term = leaf.term;
        while let Some(parent) = expression.parent(term) {
            if let Some(sibling) = expression.and_sibling(parent, term) {
                if !expression.matches(sibling, node.as_ref(), None)? {
                    matched = false;
                    break;
                }
            }
            term = parent;
        }
        if !matched {
            continue;
        }

        if let Some(seen) = seen.as_deref_mut() {
            if !seen.insert(entry.location) {
                continue;
            }
        }

        let name = node.name().unwrap_or_else(|error| {
            log::error!("entry {} in query has no name: {error}", entry.location);
            String::new()
        });
        return Ok(Some(DirEntry {
            volume: volume.id(),
            id: entry.location,
            parent_volume: volume.id(),
            parent: node.parent(),
            name,
        }));
    }

    Ok(None)
}

impl Iterator for Query<'_> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_next_entry().transpose()
    }
}

impl Drop for Query<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.registration.take() {
            self.volume.live_queries().deregister(id);
        }
    }
}

impl fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("volume", &self.volume.id())
            .field("expression", &self.expression.text())
            .field("flags", &self.flags)
            .field("pending_leaves", &self.stack.len())
            .field("active_leaf", &self.current.as_ref().map(|leaf| leaf.term))
            .field("registration", &self.registration)
            .finish()
    }
}
