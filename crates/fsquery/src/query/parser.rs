//! Query text parser.
//!
//! ```text
//! or       := and ( '||' and )*
//! and      := equation ( '&&' and )?
//! equation := '!'? '(' or ')' | operand op operand
//! op       := '=' | '==' | '!=' | '>' | '>=' | '<' | '<='
//! ```
//!
//! Operands may be quoted with `'` or `"`; a backslash makes the next
//! character literal, quoted or not.
//!
//! Parenthesis nesting and the number of equations are bounded, so every
//! tree built here can be walked recursively.

use super::equation::{CompareOp, Equation};
use super::expression::{LogicalOp, TermArena, TermId};
use crate::error::ParseError;

/// Deepest parenthesis nesting a query may use.
pub(crate) const MAX_NESTING_DEPTH: usize = 64;
/// Most equations a single query may hold.
pub(crate) const MAX_EQUATIONS: usize = 512;

/// Parses a full query; the arena holds whatever terms were built, even when
/// parsing fails.
pub(crate) fn parse_expression(text: &str) -> (TermArena, Result<TermId, ParseError>) {
    let mut parser = ExpressionParser::new(text);
    let parsed = parser.parse_or().and_then(|root| {
        parser.skip_whitespace();
        if parser.is_end() {
            Ok(root)
        } else {
            Err(ParseError::new(parser.index, "unexpected trailing input"))
        }
    });
    (parser.arena, parsed)
}

/// Parses one `attribute <op> value` equation with nothing around it.
pub(crate) fn parse_single_equation(text: &str) -> Result<Equation, ParseError> {
    let mut parser = ExpressionParser::new(text);
    let equation = parser.parse_equation_fields()?;
    parser.skip_whitespace();
    if parser.is_end() {
        Ok(equation)
    } else {
        Err(ParseError::new(parser.index, "unexpected trailing input"))
    }
}

// ---------------------------------------------------------------------------
// Expression parser
// ---------------------------------------------------------------------------

struct ExpressionParser<'a> {
    input: &'a str,
    index: usize,
    arena: TermArena,
    depth: usize,
    equations: usize,
}

impl<'a> ExpressionParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            index: 0,
            arena: TermArena::default(),
            depth: 0,
            equations: 0,
        }
    }

    fn parse_or(&mut self) -> Result<TermId, ParseError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_whitespace();
            if !self.consume_str("||") {
                return Ok(left);
            }
            let right = self.parse_and()?;
            left = self.arena.push_operator(LogicalOp::Or, left, right);
        }
    }

    /// Collects an `&&` chain and folds it from the right, so `a && b && c`
    /// becomes `a && (b && c)`.
    fn parse_and(&mut self) -> Result<TermId, ParseError> {
        let mut terms = vec![self.parse_term()?];
        loop {
            self.skip_whitespace();
            if !self.consume_str("&&") {
                break;
            }
            terms.push(self.parse_term()?);
        }

        let mut right = match terms.pop() {
            Some(term) => term,
            None => return Err(ParseError::new(self.index, "expected equation")),
        };
        while let Some(left) = terms.pop() {
            right = self.arena.push_operator(LogicalOp::And, left, right);
        }
        Ok(right)
    }

    fn parse_term(&mut self) -> Result<TermId, ParseError> {
        self.skip_whitespace();
        let start = self.index;

        let negated = self.consume('!');
        if negated {
            self.skip_whitespace();
            if self.peek() != Some('(') {
                return Err(ParseError::new(start, "negation must precede a parenthesis"));
            }
        }

        if self.consume('(') {
            if self.depth == MAX_NESTING_DEPTH {
                return Err(ParseError::new(start, "expression nested too deeply"));
            }
            self.depth += 1;
            let term = self.parse_or()?;
            self.depth -= 1;
            self.skip_whitespace();
            if !self.consume(')') {
                return Err(ParseError::new(self.index, "expected closing parenthesis"));
            }
            if negated {
                self.arena.complement(term);
            }
            return Ok(term);
        }

        if self.equations == MAX_EQUATIONS {
            return Err(ParseError::new(start, "expression has too many terms"));
        }
        let equation = self.parse_equation_fields()?;
        if !equation.init_check() {
            return Err(ParseError::new(start, "invalid equation"));
        }
        self.equations += 1;
        Ok(self.arena.push_equation(equation))
    }

    fn parse_equation_fields(&mut self) -> Result<Equation, ParseError> {
        self.skip_whitespace();
        let start = self.index;
        let Some(attribute) = self.parse_operand(is_attribute_end)? else {
            return Err(ParseError::new(start, "expected attribute name"));
        };

        self.skip_whitespace();
        let op = self.parse_compare_op()?;

        self.skip_whitespace();
        Ok(match self.parse_operand(is_value_end)? {
            Some(value) => Equation::new(attribute, op, value),
            None => Equation::invalid(),
        })
    }

    fn parse_compare_op(&mut self) -> Result<CompareOp, ParseError> {
        let position = self.index;
        let op = match self.bump() {
            Some('=') => {
                self.consume('=');
                CompareOp::Equal
            }
            Some('!') if self.consume('=') => CompareOp::NotEqual,
            Some('>') if self.consume('=') => CompareOp::GreaterThanOrEqual,
            Some('>') => CompareOp::GreaterThan,
            Some('<') if self.consume('=') => CompareOp::LessThanOrEqual,
            Some('<') => CompareOp::LessThan,
            _ => return Err(ParseError::new(position, "expected comparison operator")),
        };
        Ok(op)
    }

    /// Reads a quoted or bare operand.
    ///
    /// A quoted operand may be empty; a bare one ends at `is_end`, loses its
    /// trailing whitespace and is `None` when nothing is left.
    fn parse_operand(&mut self, is_end: fn(char) -> bool) -> Result<Option<String>, ParseError> {
        if let Some(quote @ ('"' | '\'')) = self.peek() {
            return self.parse_quoted(quote).map(Some);
        }

        let mut operand = String::new();
        while let Some(ch) = self.peek() {
            if is_end(ch) {
                break;
            }
            self.bump();
            if ch == '\\' {
                operand.push(self.escaped()?);
            } else {
                operand.push(ch);
            }
        }

        let trimmed = operand.trim_end_matches(is_whitespace);
        Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
    }

    fn parse_quoted(&mut self, quote: char) -> Result<String, ParseError> {
        let start = self.index;
        self.bump();

        let mut operand = String::new();
        loop {
            match self.bump() {
                Some(ch) if ch == quote => return Ok(operand),
                Some('\\') => operand.push(self.escaped()?),
                Some(ch) => operand.push(ch),
                None => return Err(ParseError::new(start, "unterminated quoted string")),
            }
        }
    }

    fn escaped(&mut self) -> Result<char, ParseError> {
        let position = self.index;
        self.bump()
            .ok_or_else(|| ParseError::new(position, "dangling escape"))
    }

    // ---- cursor ----

    fn peek(&self) -> Option<char> {
        self.input[self.index..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.index += ch.len_utf8();
        Some(ch)
    }

    fn consume(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.index += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn consume_str(&mut self, expected: &str) -> bool {
        if self.input[self.index..].starts_with(expected) {
            self.index += expected.len();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(is_whitespace) {
            self.bump();
        }
    }

    fn is_end(&self) -> bool {
        self.index >= self.input.len()
    }
}

fn is_whitespace(ch: char) -> bool {
    ch.is_ascii_whitespace()
}

fn is_attribute_end(ch: char) -> bool {
    matches!(ch, '=' | '!' | '<' | '>' | '&' | '|')
}

fn is_value_end(ch: char) -> bool {
    matches!(ch, '&' | '|' | ')')
}
