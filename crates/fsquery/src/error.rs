use crate::types::EntryId;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid query expression: {reason} near byte {position}")]
    InvalidExpression { position: usize, reason: &'static str },

    #[error("Failed to read attribute {attribute:?}: {reason}")]
    AttributeRead { attribute: String, reason: String },

    #[error("Node not found: {0}")]
    NodeNotFound(EntryId),

    #[error("Attribute {attribute:?} has no comparable type (type code {code:#010x})")]
    UnsupportedType { attribute: String, code: u32 },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, QueryError>;

/// Where and why a query string stopped parsing.
///
/// Parsing never fails outright; the error is kept on the expression and
/// surfaces through `Expression::init_check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{reason} near byte {position}")]
pub struct ParseError {
    pub position: usize,
    pub reason: &'static str,
}

impl ParseError {
    pub(crate) fn new(position: usize, reason: &'static str) -> Self {
        Self { position, reason }
    }
}

impl From<ParseError> for QueryError {
    fn from(error: ParseError) -> Self {
        Self::InvalidExpression {
            position: error.position,
            reason: error.reason,
        }
    }
}
