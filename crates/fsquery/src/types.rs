//! Identifiers, attribute types, query flags and result records.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Longest attribute name or string value an index key can hold.
pub const MAX_INDEX_KEY_LENGTH: usize = 255;

/// Modification times are stored index-side shifted left by this many bits
/// so that entries written within the same time unit get distinct keys.
pub const INODE_TIME_SHIFT: u32 = 16;

pub const NAME_ATTRIBUTE: &str = "name";
pub const SIZE_ATTRIBUTE: &str = "size";
pub const LAST_MODIFIED_ATTRIBUTE: &str = "last_modified";

/// Location of an entry on its volume (the inode number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(u64);

impl EntryId {
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(u32);

impl VolumeId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// On-disk attribute type, identified by its four-character type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    String,
    MimeString,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Double,
    Time,
    Other(u32),
}

impl AttrType {
    pub const STRING_CODE: u32 = 0x4353_5452; // 'CSTR'
    pub const MIME_STRING_CODE: u32 = 0x4D49_4D53; // 'MIMS'
    pub const INT32_CODE: u32 = 0x4C4F_4E47; // 'LONG'
    pub const UINT32_CODE: u32 = 0x554C_4E47; // 'ULNG'
    pub const INT64_CODE: u32 = 0x4C4C_4E47; // 'LLNG'
    pub const UINT64_CODE: u32 = 0x554C_4C47; // 'ULLG'
    pub const FLOAT_CODE: u32 = 0x464C_4F54; // 'FLOT'
    pub const DOUBLE_CODE: u32 = 0x4442_4C45; // 'DBLE'
    pub const TIME_CODE: u32 = 0x5449_4D45; // 'TIME'

    pub const fn from_code(code: u32) -> Self {
        match code {
            Self::STRING_CODE => Self::String,
            Self::MIME_STRING_CODE => Self::MimeString,
            Self::INT32_CODE => Self::Int32,
            Self::UINT32_CODE => Self::Uint32,
            Self::INT64_CODE => Self::Int64,
            Self::UINT64_CODE => Self::Uint64,
            Self::FLOAT_CODE => Self::Float,
            Self::DOUBLE_CODE => Self::Double,
            Self::TIME_CODE => Self::Time,
            other => Self::Other(other),
        }
    }

    pub const fn code(self) -> u32 {
        match self {
            Self::String => Self::STRING_CODE,
            Self::MimeString => Self::MIME_STRING_CODE,
            Self::Int32 => Self::INT32_CODE,
            Self::Uint32 => Self::UINT32_CODE,
            Self::Int64 => Self::INT64_CODE,
            Self::Uint64 => Self::UINT64_CODE,
            Self::Float => Self::FLOAT_CODE,
            Self::Double => Self::DOUBLE_CODE,
            Self::Time => Self::TIME_CODE,
            Self::Other(code) => code,
        }
    }

    /// The type values of this type are compared as.
    ///
    /// MIME strings compare as plain strings and `TIME` as a 32-bit integer.
    /// Returns `None` for types without a comparison representation.
    pub const fn comparable(self) -> Option<Self> {
        match self {
            Self::String | Self::MimeString => Some(Self::String),
            Self::Int32 | Self::Time => Some(Self::Int32),
            Self::Other(_) => None,
            other => Some(other),
        }
    }

    pub const fn is_string(self) -> bool {
        matches!(self, Self::String | Self::MimeString)
    }

    /// Size of an index key of this type; 0 means variable length.
    pub const fn fixed_key_size(self) -> usize {
        match self {
            Self::Int32 | Self::Uint32 | Self::Float | Self::Time => 4,
            Self::Int64 | Self::Uint64 | Self::Double => 8,
            Self::String | Self::MimeString | Self::Other(_) => 0,
        }
    }
}

bitflags! {
    /// Options a query session is opened with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct QueryFlags: u32 {
        /// Keep the query registered for incremental updates.
        const LIVE = 0x0000_0001;
        /// Scan the name index for attributes that have no index of their own.
        const QUERY_NON_INDEXED = 0x0000_0002;
        /// Report attribute changes of entries that stay in the result set.
        const ATTR_CHANGE_NOTIFICATION = 0x0000_0004;
    }
}

/// A matching entry produced by a query scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub volume: VolumeId,
    pub id: EntryId,
    pub parent_volume: VolumeId,
    pub parent: EntryId,
    pub name: String,
}
