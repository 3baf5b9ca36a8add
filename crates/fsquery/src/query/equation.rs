//! Leaf terms: one attribute, one comparison operator, one value.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use super::pattern;
use super::value::TypedValue;
use crate::error::Result;
use crate::types::{
    AttrType, INODE_TIME_SHIFT, LAST_MODIFIED_ATTRIBUTE, MAX_INDEX_KEY_LENGTH, NAME_ATTRIBUTE,
    SIZE_ATTRIBUTE,
};
use crate::volume::{IndexInfo, Node};

/// Score of an exact `=` on an indexed attribute; higher than any pattern.
const EQUAL_SCORE: i64 = 2048;
/// Score of an ordered comparison on an indexed attribute.
const RANGE_SCORE: i64 = 5;
/// Numerator of the index size factor.
const SIZE_SCALE: i64 = 2048 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl CompareOp {
    /// The operator that matches exactly when this one does not.
    pub const fn complement(self) -> Self {
        match self {
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::GreaterThan => Self::LessThanOrEqual,
            Self::GreaterThanOrEqual => Self::LessThan,
            Self::LessThan => Self::GreaterThanOrEqual,
            Self::LessThanOrEqual => Self::GreaterThan,
        }
    }

    /// Applies the operator to `stored.compare(query_value)`.
    pub const fn evaluate(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => matches!(ordering, Ordering::Equal),
            Self::NotEqual => !matches!(ordering, Ordering::Equal),
            Self::GreaterThan => matches!(ordering, Ordering::Greater),
            Self::GreaterThanOrEqual => !matches!(ordering, Ordering::Less),
            Self::LessThan => matches!(ordering, Ordering::Less),
            Self::LessThanOrEqual => !matches!(ordering, Ordering::Greater),
        }
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
        }
    }
}

/// A value supplied by a live update in place of the stored attribute.
#[derive(Debug, Clone, Copy)]
pub struct LiveAttribute<'a> {
    pub name: &'a str,
    pub attr_type: AttrType,
    /// `None` when the attribute did not exist (before) or was removed (after).
    pub key: Option<&'a [u8]>,
}

/// An `attribute <op> value` leaf.
///
/// An equation whose attribute, operator or value is missing is invalid and
/// never matches; an invalid pattern discards the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    attribute: Option<String>,
    op: Option<CompareOp>,
    value: Option<String>,
    is_pattern: bool,
    is_special_time: bool,
}

impl Equation {
    pub fn new(attribute: impl Into<String>, op: CompareOp, value: impl Into<String>) -> Self {
        let attribute = attribute.into();
        let mut value = Some(value.into());

        let mut is_pattern = false;
        if matches!(op, CompareOp::Equal | CompareOp::NotEqual) {
            let text = value.as_deref().unwrap_or_default();
            is_pattern = pattern::is_pattern(text);
            if is_pattern && !pattern::is_valid_pattern(text) {
                value = None;
            }
        }

        let is_special_time = attribute == LAST_MODIFIED_ATTRIBUTE;
        let attribute = (!attribute.is_empty() && attribute.len() <= MAX_INDEX_KEY_LENGTH)
            .then_some(attribute);
        let value = value.filter(|text| text.len() <= MAX_INDEX_KEY_LENGTH);

        Self {
            attribute,
            op: Some(op),
            value,
            is_pattern,
            is_special_time,
        }
    }

    /// Parses a single `attribute <op> value` equation.
    ///
    /// Malformed text yields an invalid equation rather than an error.
    pub fn from_text(text: &str) -> Self {
        super::parser::parse_single_equation(text).unwrap_or_else(|_| Self::invalid())
    }

    pub(crate) fn invalid() -> Self {
        Self {
            attribute: None,
            op: None,
            value: None,
            is_pattern: false,
            is_special_time: false,
        }
    }

    pub fn init_check(&self) -> bool {
        self.attribute.is_some() && self.op.is_some() && self.value.is_some()
    }

    pub fn attribute(&self) -> &str {
        self.attribute.as_deref().unwrap_or_default()
    }

    pub fn op(&self) -> Option<CompareOp> {
        self.op
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_pattern(&self) -> bool {
        self.is_pattern
    }

    pub fn is_special_time(&self) -> bool {
        self.is_special_time
    }

    pub fn complement(&mut self) {
        self.op = self.op.map(CompareOp::complement);
    }

    /// Relevance of this equation as the driver of an index scan.
    ///
    /// Zero for `!=` and for attributes without an index. Otherwise `=` beats
    /// any pattern, a pattern scores by the length of its literal prefix, and
    /// the result shrinks as the index grows.
    pub fn calculate_score(&self, index: Option<&IndexInfo>) -> i64 {
        let (Some(index), Some(op)) = (index, self.op) else {
            return 0;
        };
        if op == CompareOp::NotEqual {
            return 0;
        }

        let score = if self.is_pattern {
            let prefix = self.value().map(pattern::fixed_prefix_len).unwrap_or(0);
            (prefix as i64) << 3
        } else if op == CompareOp::Equal {
            EQUAL_SCORE
        } else {
            RANGE_SCORE
        };

        let size = i64::try_from(index.size).unwrap_or(i64::MAX).max(1);
        score.saturating_mul(SIZE_SCALE) / size
    }

    /// Decodes the value for comparison against attributes of type `ty`.
    pub fn convert(&self, ty: AttrType) -> Option<TypedValue> {
        TypedValue::parse(self.value.as_deref()?, ty)
    }

    /// Whether patterns apply when comparing against a value of this type.
    pub(crate) fn uses_pattern(&self, value: &TypedValue) -> bool {
        self.is_pattern && matches!(value, TypedValue::String(_))
    }

    /// Compares a stored key or attribute buffer against the converted value.
    pub fn compare_to(&self, value: &TypedValue, stored_type: AttrType, stored: &[u8]) -> bool {
        let Some(op) = self.op else {
            return false;
        };

        let ordering = if self.uses_pattern(value) {
            let Some(TypedValue::String(candidate)) = TypedValue::from_key(AttrType::String, stored)
            else {
                return false;
            };
            let pattern = value.as_str().unwrap_or_default();
            if pattern::matches(pattern, &candidate) {
                Ordering::Equal
            } else {
                Ordering::Greater
            }
        } else if self.is_special_time {
            let (Some(TypedValue::Int64(raw)), Some(wanted)) = (
                TypedValue::from_key(AttrType::Int64, stored),
                value.as_i64(),
            ) else {
                return false;
            };
            (raw >> INODE_TIME_SHIFT).cmp(&wanted)
        } else {
            let Some(stored) = TypedValue::from_key(stored_type, stored) else {
                return false;
            };
            stored.compare(value)
        };

        op.evaluate(ordering)
    }

    /// Evaluates the equation against a node.
    ///
    /// A live attribute with the same name replaces the stored value.
    /// Otherwise the value is resolved from the virtual `name`, `size` and
    /// `last_modified` attributes, then the node's small data area, then its
    /// stored attributes. A missing attribute is a no-match; a failed read is
    /// an error.
    pub fn matches(&self, node: &dyn Node, live: Option<&LiveAttribute<'_>>) -> Result<bool> {
        let Some(attribute) = self.attribute.as_deref() else {
            return Ok(false);
        };

        let (stored_type, stored): (AttrType, Cow<'_, [u8]>) = match live {
            Some(live) if live.name == attribute => match live.key {
                Some(key) => (live.attr_type, Cow::Borrowed(key)),
                None => return Ok(false),
            },
            _ => match resolve_attribute(node, attribute)? {
                Some(found) => found,
                None => return Ok(false),
            },
        };

        let Some(value) = self.convert(stored_type) else {
            log::debug!(
                "attribute {attribute:?} of node {} has no comparable type {:#010x}",
                node.id(),
                stored_type.code()
            );
            return Ok(false);
        };

        Ok(self.compare_to(&value, stored_type, &stored))
    }
}

fn resolve_attribute(
    node: &dyn Node,
    attribute: &str,
) -> Result<Option<(AttrType, Cow<'static, [u8]>)>> {
    let resolved = match attribute {
        NAME_ATTRIBUTE => Some((AttrType::String, node.name()?.into_bytes())),
        SIZE_ATTRIBUTE => Some((AttrType::Int64, node.size().to_le_bytes().to_vec())),
        LAST_MODIFIED_ATTRIBUTE => Some((
            AttrType::Int64,
            node.last_modified().to_le_bytes().to_vec(),
        )),
        _ => match node.small_data(attribute) {
            Some(small) => Some((small.attr_type, small.data)),
            None => node
                .read_attribute(attribute, MAX_INDEX_KEY_LENGTH)?
                .map(|stored| (stored.attr_type, stored.data)),
        },
    };
    Ok(resolved.map(|(ty, data)| (ty, Cow::Owned(data))))
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?} {} {:?}]",
            self.attribute(),
            self.op.map_or("???", CompareOp::symbol),
            self.value().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::types::EntryId;
    use crate::volume::{AttributeData, MemoryNode};

    fn node() -> MemoryNode {
        MemoryNode::new(EntryId::new(10), EntryId::new(1), "report.txt")
            .with_size(2048)
            .with_last_modified(1_000)
            .with_attribute("rating", AttributeData::new(AttrType::Int32, 4i32.to_le_bytes()))
            .with_attribute("title", AttributeData::new(AttrType::String, b"Quarterly\0".to_vec()))
    }

    struct FailingNode;

    impl Node for FailingNode {
        fn id(&self) -> EntryId {
            EntryId::new(99)
        }

        fn parent(&self) -> EntryId {
            EntryId::new(1)
        }

        fn name(&self) -> Result<String> {
            Ok("broken".to_string())
        }

        fn size(&self) -> i64 {
            0
        }

        fn last_modified(&self) -> i64 {
            0
        }

        fn small_data(&self, _attribute: &str) -> Option<AttributeData> {
            None
        }

        fn read_attribute(&self, attribute: &str, _limit: usize) -> Result<Option<AttributeData>> {
            Err(QueryError::AttributeRead {
                attribute: attribute.to_string(),
                reason: "device error".to_string(),
            })
        }
    }

    #[test]
    fn complement_table_is_an_involution() {
        for op in [
            CompareOp::Equal,
            CompareOp::NotEqual,
            CompareOp::GreaterThan,
            CompareOp::GreaterThanOrEqual,
            CompareOp::LessThan,
            CompareOp::LessThanOrEqual,
        ] {
            assert_eq!(op.complement().complement(), op);
            for ordering in [Ordering::Less, Ordering::Equal, Ordering::Greater] {
                assert_ne!(op.evaluate(ordering), op.complement().evaluate(ordering));
            }
        }
    }

    #[test]
    fn virtual_attributes_resolve_without_lookup() {
        let node = node();
        assert!(Equation::new("name", CompareOp::Equal, "report.txt")
            .matches(&node, None)
            .unwrap());
        assert!(Equation::new("size", CompareOp::GreaterThan, "1024")
            .matches(&node, None)
            .unwrap());
        assert!(Equation::new("last_modified", CompareOp::Equal, "1000")
            .matches(&node, None)
            .unwrap());
    }

    #[test]
    fn stored_attributes_convert_query_value_to_their_type() {
        let node = node();
        assert!(Equation::new("rating", CompareOp::GreaterThanOrEqual, "0x4")
            .matches(&node, None)
            .unwrap());
        assert!(Equation::new("title", CompareOp::Equal, "Quarterly")
            .matches(&node, None)
            .unwrap());
        assert!(Equation::new("title", CompareOp::Equal, "Q*")
            .matches(&node, None)
            .unwrap());
    }

    #[test]
    fn missing_attribute_is_no_match() {
        let node = node();
        assert!(!Equation::new("author", CompareOp::Equal, "x")
            .matches(&node, None)
            .unwrap());
        assert!(!Equation::new("author", CompareOp::NotEqual, "x")
            .matches(&node, None)
            .unwrap());
    }

    #[test]
    fn read_failure_is_an_error() {
        let result = Equation::new("author", CompareOp::Equal, "x").matches(&FailingNode, None);
        assert!(matches!(result, Err(QueryError::AttributeRead { .. })));
    }

    #[test]
    fn live_value_replaces_stored_value() {
        let node = node();
        let equation = Equation::new("size", CompareOp::LessThan, "100");
        let new_size = 10i64.to_le_bytes();
        let live = LiveAttribute {
            name: "size",
            attr_type: AttrType::Int64,
            key: Some(&new_size),
        };
        assert!(!equation.matches(&node, None).unwrap());
        assert!(equation.matches(&node, Some(&live)).unwrap());

        let absent = LiveAttribute {
            name: "size",
            attr_type: AttrType::Int64,
            key: None,
        };
        assert!(!equation.matches(&node, Some(&absent)).unwrap());
    }

    #[test]
    fn special_time_unshifts_stored_keys() {
        let equation = Equation::new("last_modified", CompareOp::GreaterThanOrEqual, "500");
        assert!(equation.is_special_time());
        let value = equation.convert(AttrType::Int64).unwrap();
        let shifted = ((600i64 << INODE_TIME_SHIFT) | 3).to_le_bytes();
        assert!(equation.compare_to(&value, AttrType::Int64, &shifted));
        let early = (400i64 << INODE_TIME_SHIFT).to_le_bytes();
        assert!(!equation.compare_to(&value, AttrType::Int64, &early));
    }

    #[test]
    fn patterns_only_apply_to_strings() {
        let equation = Equation::new("rating", CompareOp::Equal, "4*");
        assert!(equation.is_pattern());
        let value = equation.convert(AttrType::Int32).unwrap();
        assert!(!equation.uses_pattern(&value));
        assert!(equation.compare_to(&value, AttrType::Int32, &4i32.to_le_bytes()));
    }

    #[test]
    fn invalid_pattern_discards_value() {
        let equation = Equation::new("name", CompareOp::Equal, "[abc");
        assert!(equation.value().is_none());
        assert!(!equation.init_check());
        assert!(!Equation::from_text("name == \"[abc\"").init_check());
    }

    #[test]
    fn scores_prefer_small_exact_indices() {
        let small = IndexInfo {
            attr_type: AttrType::String,
            key_size: 0,
            size: 2048,
        };
        let large = IndexInfo { size: 8192, ..small };

        let exact = Equation::new("name", CompareOp::Equal, "a");
        assert_eq!(exact.calculate_score(Some(&small)), 2048 * 1024);
        assert!(exact.calculate_score(Some(&small)) > exact.calculate_score(Some(&large)));
        assert_eq!(exact.calculate_score(None), 0);

        let unequal = Equation::new("name", CompareOp::NotEqual, "a");
        assert_eq!(unequal.calculate_score(Some(&small)), 0);

        let prefixed = Equation::new("name", CompareOp::Equal, "abc*");
        assert_eq!(prefixed.calculate_score(Some(&small)), (3 << 3) * 1024);
        let range = Equation::new("name", CompareOp::GreaterThan, "a");
        assert_eq!(range.calculate_score(Some(&small)), 5 * 1024);
    }

    #[test]
    fn display_lists_operator_symbol() {
        let equation = Equation::new("size", CompareOp::GreaterThanOrEqual, "15");
        assert_eq!(equation.to_string(), "[\"size\" >= \"15\"]");
    }
}
