//! Live query notifications.
//!
//! Live queries report membership changes as `QueryEvent`s addressed to a
//! `QueryListener`: a sink plus the token the listener registered with. The
//! engine only hands events over; transport is up to the sink.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::types::{EntryId, VolumeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryEventKind {
    /// The entry started matching the query.
    EntryCreated,
    /// The entry stopped matching the query.
    EntryRemoved,
    /// The entry still matches but one of its attributes changed.
    AttributeChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEvent {
    pub kind: QueryEventKind,
    pub token: u32,
    pub volume: VolumeId,
    /// Directory the entry is (or was) listed in.
    pub directory: EntryId,
    pub name: String,
    pub node: EntryId,
}

/// Receives the events of live queries.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, event: QueryEvent);
}

/// Where a live query sends its events.
#[derive(Clone)]
pub struct QueryListener {
    sink: Arc<dyn NotificationSink>,
    token: u32,
}

impl QueryListener {
    pub fn new(sink: Arc<dyn NotificationSink>, token: u32) -> Self {
        Self { sink, token }
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    pub(crate) fn notify(
        &self,
        kind: QueryEventKind,
        volume: VolumeId,
        directory: EntryId,
        name: &str,
        node: EntryId,
    ) -> QueryEvent {
        let event = QueryEvent {
            kind,
            token: self.token,
            volume,
            directory,
            name: name.to_string(),
            node,
        };
        self.sink.deliver(event.clone());
        event
    }
}

impl fmt::Debug for QueryListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryListener")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Channel sink
// ---------------------------------------------------------------------------

/// Forwards events over an unbounded channel.
///
/// Sending never blocks and needs no runtime, so events can be delivered from
/// inside a volume's write path.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<QueryEvent>,
}

impl ChannelSink {
    pub fn new(sender: UnboundedSender<QueryEvent>) -> Self {
        Self { sender }
    }

    /// Creates a sink together with the receiving end of its channel.
    pub fn channel() -> (Self, UnboundedReceiver<QueryEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    /// Shorthand for a listener that delivers through a new channel.
    pub fn listener(token: u32) -> (QueryListener, UnboundedReceiver<QueryEvent>) {
        let (sink, receiver) = Self::channel();
        (QueryListener::new(Arc::new(sink), token), receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn deliver(&self, event: QueryEvent) {
        if let Err(error) = self.sender.send(event) {
            log::warn!(
                "dropping {:?} event for node {}: receiver is gone",
                error.0.kind,
                error.0.node
            );
        }
    }
}
