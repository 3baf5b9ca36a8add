//! Incremental evaluation for live queries.
//!
//! A single attribute change is evaluated by matching the expression twice,
//! once with the old value and once with the new one standing in for the
//! stored attribute. The pair of results decides which event, if any, the
//! listener gets.


use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::equation::LiveAttribute;
use super::expression::Expression;
use crate::error::Result;
use crate::notify::{QueryEvent, QueryEventKind, QueryListener};
use crate::types::{AttrType, EntryId, QueryFlags, VolumeId, NAME_ATTRIBUTE};
use crate::volume::Node;

/// How an entry's membership changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Removed,
    Changed,
}

impl Transition {
    fn event_kind(self) -> QueryEventKind {
        match self {
            Self::Created => QueryEventKind::EntryCreated,
            Self::Removed => QueryEventKind::EntryRemoved,
            Self::Changed => QueryEventKind::AttributeChanged,
        }
    }
}

/// Maps the old and new match results to a transition.
///
/// An entry that keeps matching only produces `Changed` when attribute
/// change notifications were requested.
pub fn classify_transition(
    old_match: bool,
    new_match: bool,
    notify_changes: bool,
) -> Option<Transition> {
    match (old_match, new_match) {
        (false, true) => Some(Transition::Created),
        (true, false) => Some(Transition::Removed),
        (true, true) if notify_changes => Some(Transition::Changed),
        _ => None,
    }
}

/// A query registered with a volume for incremental updates.
pub struct LiveQuery {
    expression: Arc<Expression>,
    volume: VolumeId,
    flags: QueryFlags,
    listener: RwLock<Option<QueryListener>>,
}

impl LiveQuery {
    pub fn new(
        expression: Arc<Expression>,
        volume: VolumeId,
        flags: QueryFlags,
        listener: Option<QueryListener>,
    ) -> Self {
        Self {
            expression,
            volume,
            flags,
            listener: RwLock::new(listener),
        }
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn flags(&self) -> QueryFlags {
        self.flags
    }

    pub fn listener(&self) -> Option<QueryListener> {
        self.listener.read().clone()
    }

    pub fn set_listener(&self, listener: Option<QueryListener>) {
        *self.listener.write() = listener;
    }

    /// Evaluates a change of `attribute` on `node` from `old` to `new`.
    ///
    /// `None` stands for an attribute that did not exist before or was
    /// removed. Returns the event sent to the listener; nothing is evaluated
    /// while the query has no listener.
    pub fn live_update(
        &self,
        node: &dyn Node,
        attribute: &str,
        attr_type: AttrType,
        old: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<Option<QueryEvent>> {
        let Some(listener) = self.listener() else {
            return Ok(None);
        };

        let old_match = self.expression.matches_node(
            node,
            Some(&LiveAttribute {
                name: attribute,
                attr_type,
                key: old,
            }),
        )?;
        let new_match = self.expression.matches_node(
            node,
            Some(&LiveAttribute {
                name: attribute,
                attr_type,
                key: new,
            }),
        )?;

        let notify_changes = self.flags.contains(QueryFlags::ATTR_CHANGE_NOTIFICATION);
        let Some(transition) = classify_transition(old_match, new_match, notify_changes) else {
            return Ok(None);
        };

        let name = if attribute == NAME_ATTRIBUTE {
            key_to_name(new.or(old).unwrap_or_default())
        } else {
            node.name().unwrap_or_else(|error| {
                log::error!("entry {} in live update has no name: {error}", node.id());
                String::new()
            })
        };

        Ok(Some(listener.notify(
            transition.event_kind(),
            self.volume,
            node.parent(),
            &name,
            node.id(),
        )))
    }

    /// Evaluates a rename or move of `node`.
    ///
    /// Only an entry that matches under both names is reported, as a removal
    /// from the old directory followed by a creation in the new one.
    pub fn live_update_rename_move(
        &self,
        node: &dyn Node,
        old_directory: EntryId,
        old_name: &str,
        new_directory: EntryId,
        new_name: &str,
    ) -> Result<Vec<QueryEvent>> {
        let Some(listener) = self.listener() else {
            return Ok(Vec::new());
        };

        let matches_name = |name: &str| {
            self.expression.matches_node(
                node,
                Some(&LiveAttribute {
                    name: NAME_ATTRIBUTE,
                    attr_type: AttrType::String,
                    key: Some(name.as_bytes()),
                }),
            )
        };
        if !matches_name(old_name)? || !matches_name(new_name)? {
            return Ok(Vec::new());
        }

        Ok(vec![
            listener.notify(
                QueryEventKind::EntryRemoved,
                self.volume,
                old_directory,
                old_name,
                node.id(),
            ),
            listener.notify(
                QueryEventKind::EntryCreated,
                self.volume,
                new_directory,
                new_name,
                node.id(),
            ),
        ])
    }

    /// Reports a new entry that matches the query.
    pub fn entry_created(&self, node: &dyn Node) -> Result<Option<QueryEvent>> {
        self.entry_lifecycle(node, QueryEventKind::EntryCreated)
    }

    /// Reports a deleted entry that matched the query.
    pub fn entry_removed(&self, node: &dyn Node) -> Result<Option<QueryEvent>> {
        self.entry_lifecycle(node, QueryEventKind::EntryRemoved)
    }

    fn entry_lifecycle(&self, node: &dyn Node, kind: QueryEventKind) -> Result<Option<QueryEvent>> {
        let Some(listener) = self.listener() else {
            return Ok(None);
        };
        if !self.expression.matches_node(node, None)? {
            return Ok(None);
        }

        let name = node.name()?;
        Ok(Some(listener.notify(
            kind,
            self.volume,
            node.parent(),
            &name,
            node.id(),
        )))
    }
}

fn key_to_name(key: &[u8]) -> String {
    let end = memchr::memchr(0, key).unwrap_or(key.len());
    String::from_utf8_lossy(&key[..end]).into_owned()
}

impl fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery")
            .field("expression", &self.expression.text())
            .field("volume", &self.volume)
            .field("flags", &self.flags)
            .field("listener", &*self.listener.read())
            .finish()
    }
}
