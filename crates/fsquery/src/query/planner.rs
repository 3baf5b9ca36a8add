//! Scan planning.
//!
//! Scores every term against the volume's index metadata, then unrolls the
//! tree into the list of equations whose indices will be iterated:
//! - AND descends only into its better scoring side; the other side is
//!   verified per candidate.
//! - OR descends into both sides, since each must be scanned.

use super::expression::{Expression, LogicalOp, Term, TermId};
use crate::volume::Volume;

/// Per-term scan scores, indexed by `TermId`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scores(Vec<i64>);

impl Scores {
    /// Scores the expression bottom-up.
    ///
    /// Equations score by operator and index size; AND takes the maximum of
    /// its children and OR the minimum.
    pub fn calculate(expression: &Expression, volume: &dyn Volume) -> Self {
        let mut scores = Self::default();
        if let Some(root) = expression.root() {
            scores.calculate_term(expression, volume, root);
        }
        scores
    }

    fn calculate_term(&mut self, expression: &Expression, volume: &dyn Volume, id: TermId) -> i64 {
        let score = match expression.term(id) {
            Some(Term::Equation(equation)) => {
                let index = volume.index_info(equation.attribute());
                equation.calculate_score(index.as_ref())
            }
            Some(Term::Operator(operator)) => {
                let left = self.calculate_term(expression, volume, operator.left);
                let right = self.calculate_term(expression, volume, operator.right);
                match operator.op {
                    LogicalOp::And => left.max(right),
                    LogicalOp::Or => left.min(right),
                }
            }
            None => 0,
        };

        if self.0.len() <= id.index() {
            self.0.resize(id.index() + 1, 0);
        }
        self.0[id.index()] = score;
        score
    }

    pub fn score(&self, id: TermId) -> i64 {
        self.0.get(id.index()).copied().unwrap_or(0)
    }
}

/// Flattens the expression into the equations to scan.
///
/// The returned list is consumed from the back: the last element is the
/// first leaf to scan, so OR branches run left to right. On an AND whose
/// sides score equally, the left side drives.
pub fn unroll(expression: &Expression, scores: &Scores) -> Vec<TermId> {
    let mut work_list = Vec::new();
    let mut pending: Vec<TermId> = expression.root().into_iter().collect();

    while let Some(id) = pending.pop() {
        match expression.term(id) {
            Some(Term::Operator(operator)) => match operator.op {
                LogicalOp::Or => {
                    pending.push(operator.left);
                    pending.push(operator.right);
                }
                LogicalOp::And => {
                    if scores.score(operator.right) > scores.score(operator.left) {
                        pending.push(operator.right);
                    } else {
                        pending.push(operator.left);
                    }
                }
            },
            Some(Term::Equation(_)) => work_list.push(id),
            None => {}
        }
    }

    work_list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VolumeId;
    use crate::volume::MemoryVolume;

    fn leaf_attributes(expression: &Expression, mut work_list: Vec<TermId>) -> Vec<String> {
        let mut attributes = Vec::new();
        while let Some(id) = work_list.pop() {
            attributes.push(expression.equation(id).unwrap().attribute().to_string());
        }
        attributes
    }

    #[test]
    fn and_scans_only_the_better_indexed_side() {
        let volume = MemoryVolume::new(VolumeId::new(1));
        let expression = Expression::parse("color == red && name == \"a\"");
        let scores = Scores::calculate(&expression, &volume);

        let root = expression.root().unwrap();
        assert!(scores.score(root) > 0);
        let work_list = unroll(&expression, &scores);
        assert_eq!(leaf_attributes(&expression, work_list), ["name"]);
    }

    #[test]
    fn or_scans_both_sides_left_first() {
        let volume = MemoryVolume::new(VolumeId::new(1));
        let expression = Expression::parse("name == \"a\" || size == 30 || color == red");
        let scores = Scores::calculate(&expression, &volume);
        assert_eq!(scores.score(expression.root().unwrap()), 0);

        let work_list = unroll(&expression, &scores);
        assert_eq!(
            leaf_attributes(&expression, work_list),
            ["name", "size", "color"]
        );
    }

    #[test]
    fn equal_scores_prefer_the_left_side() {
        let volume = MemoryVolume::new(VolumeId::new(1));
        let expression = Expression::parse("color == red && shade == dark");
        let scores = Scores::calculate(&expression, &volume);
        let work_list = unroll(&expression, &scores);
        assert_eq!(leaf_attributes(&expression, work_list), ["color"]);
    }

    #[test]
    fn invalid_expression_plans_nothing() {
        let volume = MemoryVolume::new(VolumeId::new(1));
        let expression = Expression::parse("name ==");
        let scores = Scores::calculate(&expression, &volume);
        assert!(unroll(&expression, &scores).is_empty());
    }
}
