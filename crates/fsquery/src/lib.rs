//! Attribute query engine for indexed filesystems.
//!
//! This crate provides:
//! - A query language over entry attributes (`size >= 1024 && name == "*.txt"`)
//! - Index-driven query sessions that stream matching directory entries
//! - Live queries that turn attribute changes into membership notifications
//! - An in-memory volume implementing the storage interfaces

pub mod error;
pub mod notify;
pub mod query;
pub mod registry;
pub mod types;
pub mod volume;

// Re-export main types
pub use error::{ParseError, QueryError, Result};
pub use notify::{ChannelSink, NotificationSink, QueryEvent, QueryEventKind, QueryListener};
pub use query::{CompareOp, Equation, Expression, LiveQuery, Query, TypedValue};
pub use registry::{LiveQueryId, LiveQueryRegistry};
pub use types::{AttrType, DirEntry, EntryId, QueryFlags, VolumeId};
pub use volume::{MemoryNode, MemoryVolume, Node, Volume};
