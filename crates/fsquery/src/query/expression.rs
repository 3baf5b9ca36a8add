//! Query expression tree.
//!
//! Terms live in an arena owned by the `Expression`; operators refer to their
//! children and every term to its parent by `TermId`. Negation never appears
//! as a node: the parser complements negated subtrees in place.

use std::fmt;

use super::equation::{Equation, LiveAttribute};
use super::parser;
use crate::error::{ParseError, QueryError, Result};
use crate::volume::Node;

/// Handle of a term inside its expression's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(u32);

impl TermId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub const fn complement(self) -> Self {
        match self {
            Self::And => Self::Or,
            Self::Or => Self::And,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operator {
    pub op: LogicalOp,
    pub left: TermId,
    pub right: TermId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Equation(Equation),
    Operator(Operator),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TermNode {
    parent: Option<TermId>,
    term: Term,
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TermArena {
    nodes: Vec<TermNode>,
}

impl TermArena {
    pub(crate) fn push_equation(&mut self, equation: Equation) -> TermId {
        self.push(Term::Equation(equation))
    }

    pub(crate) fn push_operator(&mut self, op: LogicalOp, left: TermId, right: TermId) -> TermId {
        let id = self.push(Term::Operator(Operator { op, left, right }));
        self.nodes[left.index()].parent = Some(id);
        self.nodes[right.index()].parent = Some(id);
        id
    }

    fn push(&mut self, term: Term) -> TermId {
        let id = TermId(self.nodes.len() as u32);
        self.nodes.push(TermNode { parent: None, term });
        id
    }

    fn get(&self, id: TermId) -> Option<&TermNode> {
        self.nodes.get(id.index())
    }

    /// Applies De Morgan's law to the subtree rooted at `id`.
    pub(crate) fn complement(&mut self, id: TermId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(node) = self.nodes.get_mut(id.index()) else {
                continue;
            };
            match &mut node.term {
                Term::Equation(equation) => equation.complement(),
                Term::Operator(operator) => {
                    operator.op = operator.op.complement();
                    pending.push(operator.left);
                    pending.push(operator.right);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Expression
// ---------------------------------------------------------------------------

/// A parsed query.
///
/// Parsing never fails; malformed text leaves the expression without a root
/// and `init_check` reports why.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    text: String,
    arena: TermArena,
    root: Option<TermId>,
    error: Option<ParseError>,
}

impl Expression {
    pub fn parse(text: &str) -> Self {
        let (arena, parsed) = parser::parse_expression(text);
        let (root, error) = match parsed {
            Ok(root) => (Some(root), None),
            Err(error) => {
                log::debug!("query {text:?} does not parse: {error}");
                (None, Some(error))
            }
        };

        let expression = Self {
            text: text.to_string(),
            arena,
            root,
            error,
        };
        if expression.root.is_some() {
            log::debug!("parsed query {text:?} as {expression}");
        }
        expression
    }

    /// Fails unless the tree is complete: every operator has two valid
    /// children and every equation an attribute, an operator and a value.
    pub fn init_check(&self) -> Result<()> {
        if let Some(error) = self.error {
            return Err(error.into());
        }
        let Some(root) = self.root else {
            return Err(QueryError::InvalidExpression {
                position: 0,
                reason: "empty expression",
            });
        };
        if self.is_valid_term(root) {
            Ok(())
        } else {
            Err(QueryError::InvalidExpression {
                position: 0,
                reason: "incomplete term",
            })
        }
    }

    pub fn is_valid(&self) -> bool {
        self.init_check().is_ok()
    }

    fn is_valid_term(&self, id: TermId) -> bool {
        match self.term(id) {
            Some(Term::Equation(equation)) => equation.init_check(),
            Some(Term::Operator(operator)) => {
                self.is_valid_term(operator.left) && self.is_valid_term(operator.right)
            }
            None => false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn root(&self) -> Option<TermId> {
        self.root
    }

    pub fn parse_error(&self) -> Option<ParseError> {
        self.error
    }

    pub fn term(&self, id: TermId) -> Option<&Term> {
        self.arena.get(id).map(|node| &node.term)
    }

    pub fn parent(&self, id: TermId) -> Option<TermId> {
        self.arena.get(id).and_then(|node| node.parent)
    }

    pub fn equation(&self, id: TermId) -> Option<&Equation> {
        match self.term(id)? {
            Term::Equation(equation) => Some(equation),
            Term::Operator(_) => None,
        }
    }

    /// Whether any operator in the tree is an OR.
    pub fn has_or(&self) -> bool {
        self.arena
            .nodes
            .iter()
            .any(|node| matches!(&node.term, Term::Operator(op) if op.op == LogicalOp::Or))
    }

    /// The child of the AND operator `parent` that is not `child`.
    ///
    /// `None` if `parent` is not an AND or `child` is not one of its children.
    pub fn and_sibling(&self, parent: TermId, child: TermId) -> Option<TermId> {
        match self.term(parent)? {
            Term::Operator(Operator {
                op: LogicalOp::And,
                left,
                right,
            }) => {
                if *left == child {
                    Some(*right)
                } else if *right == child {
                    Some(*left)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Negates the whole expression.
    pub fn complement(&mut self) {
        if let Some(root) = self.root {
            self.arena.complement(root);
        }
    }

    /// Evaluates the subtree at `id` against `node`.
    ///
    /// AND stops at the first side that does not match, OR at the first side
    /// that does; the left side is always evaluated first.
    pub fn matches(
        &self,
        id: TermId,
        node: &dyn Node,
        live: Option<&LiveAttribute<'_>>,
    ) -> Result<bool> {
        match self.term(id) {
            Some(Term::Equation(equation)) => equation.matches(node, live),
            Some(Term::Operator(operator)) => {
                let left = self.matches(operator.left, node, live)?;
                match operator.op {
                    LogicalOp::And if !left => Ok(false),
                    LogicalOp::Or if left => Ok(true),
                    _ => self.matches(operator.right, node, live),
                }
            }
            None => Err(QueryError::Internal(format!(
                "term {} outside of expression",
                id.index()
            ))),
        }
    }

    /// Evaluates the whole expression; an invalid expression never matches.
    pub fn matches_node(&self, node: &dyn Node, live: Option<&LiveAttribute<'_>>) -> Result<bool> {
        match self.root {
            Some(root) => self.matches(root, node, live),
            None => Ok(false),
        }
    }

    fn fmt_term(&self, id: TermId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.term(id) {
            Some(Term::Equation(equation)) => write!(f, "{equation}"),
            Some(Term::Operator(operator)) => {
                f.write_str("( ")?;
                self.fmt_term(operator.left, f)?;
                write!(f, " {} ", operator.op.label())?;
                self.fmt_term(operator.right, f)?;
                f.write_str(" )")
            }
            None => f.write_str("<missing>"),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            Some(root) => self.fmt_term(root, f),
            None => f.write_str("<invalid>"),
        }
    }
}
