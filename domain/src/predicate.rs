use serde::{Deserialize, Serialize};

use crate::state::{Fitzpatrick, Score, StateKey, StateValue, ValueDomain, WorldState};

/// Comparison operator usable inside a clause. Ordering operators only
/// apply to score-domain keys; clause constructors enforce this.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Strictly less than (scores only).
    Lt,
    /// Greater than or equal (scores only).
    Ge,
}

/// Single comparison over one state key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clause {
    /// Key under comparison.
    pub key: StateKey,
    /// Operator.
    pub op: CompareOp,
    /// Right-hand value.
    pub value: StateValue,
}

impl Clause {
    /// Flag equality clause.
    #[must_use]
    pub const fn flag(key: StateKey, expected: bool) -> Self {
        Self {
            key,
            op: CompareOp::Eq,
            value: StateValue::Flag(expected),
        }
    }

    /// Requires the phototype key to hold the given value.
    #[must_use]
    pub const fn fitzpatrick_eq(value: Option<Fitzpatrick>) -> Self {
        Self {
            key: StateKey::FitzpatrickType,
            op: CompareOp::Eq,
            value: StateValue::Fitzpatrick(value),
        }
    }

    /// Requires the phototype to be determined.
    #[must_use]
    pub const fn fitzpatrick_known() -> Self {
        Self {
            key: StateKey::FitzpatrickType,
            op: CompareOp::Ne,
            value: StateValue::Fitzpatrick(None),
        }
    }

    /// Score strictly-below clause.
    #[must_use]
    pub fn score_lt(key: StateKey, threshold: f32) -> Self {
        Self {
            key,
            op: CompareOp::Lt,
            value: StateValue::score(threshold),
        }
    }

    /// Score at-or-above clause.
    #[must_use]
    pub fn score_ge(key: StateKey, threshold: f32) -> Self {
        Self {
            key,
            op: CompareOp::Ge,
            value: StateValue::score(threshold),
        }
    }

    /// Evaluates the clause against a state. An absent key never
    /// satisfies a clause other than `Ne`.
    #[must_use]
    pub fn satisfied_by(&self, state: &WorldState) -> bool {
        let Some(actual) = state.get(self.key) else {
            return matches!(self.op, CompareOp::Ne);
        };
        match self.op {
            CompareOp::Eq => actual == &self.value,
            CompareOp::Ne => actual != &self.value,
            CompareOp::Lt => Self::scores(actual, &self.value)
                .is_some_and(|(lhs, rhs)| lhs < rhs),
            CompareOp::Ge => Self::scores(actual, &self.value)
                .is_some_and(|(lhs, rhs)| lhs >= rhs),
        }
    }

    fn scores(lhs: &StateValue, rhs: &StateValue) -> Option<(Score, Score)> {
        match (lhs, rhs) {
            (StateValue::Score(a), StateValue::Score(b)) => Some((*a, *b)),
            _ => None,
        }
    }

    /// True when the clause is well formed for its key's domain.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        if self.key.domain() != self.value.domain() {
            return false;
        }
        match self.op {
            CompareOp::Eq | CompareOp::Ne => true,
            CompareOp::Lt | CompareOp::Ge => self.key.domain() == ValueDomain::Score,
        }
    }
}

/// Conjunction of clauses over a world state. An empty predicate is
/// vacuously satisfied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// Empty (always true) predicate.
    #[must_use]
    pub const fn always() -> Self {
        Self {
            clauses: Vec::new(),
        }
    }

    /// Builds a predicate from clauses.
    #[must_use]
    pub fn all(clauses: impl IntoIterator<Item = Clause>) -> Self {
        Self {
            clauses: clauses.into_iter().collect(),
        }
    }

    /// Adds a flag-equality clause.
    #[must_use]
    pub fn and_flag(mut self, key: StateKey, expected: bool) -> Self {
        self.clauses.push(Clause::flag(key, expected));
        self
    }

    /// Adds an arbitrary clause.
    #[must_use]
    pub fn and(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Clause list in declaration order.
    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// True when every clause holds.
    #[must_use]
    pub fn satisfied_by(&self, state: &WorldState) -> bool {
        self.clauses.iter().all(|clause| clause.satisfied_by(state))
    }

    /// Number of clauses not yet satisfied. This is the planner's
    /// heuristic input: each unmet clause needs at least one action.
    #[must_use]
    pub fn unmet_count(&self, state: &WorldState) -> usize {
        self.clauses
            .iter()
            .filter(|clause| !clause.satisfied_by(state))
            .count()
    }

    /// True when every clause is well formed.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.clauses.iter().all(Clause::is_well_formed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_predicate_is_vacuous() {
        assert!(Predicate::always().satisfied_by(&WorldState::initial()));
        assert_eq!(Predicate::always().unmet_count(&WorldState::initial()), 0);
    }

    #[test]
    fn flag_clauses_evaluate() {
        let mut state = WorldState::initial();
        let goal = Predicate::always()
            .and_flag(StateKey::RiskAssessed, true)
            .and_flag(StateKey::AuditLogged, true);
        assert_eq!(goal.unmet_count(&state), 2);
        state
            .set(StateKey::RiskAssessed, StateValue::Flag(true))
            .unwrap();
        assert_eq!(goal.unmet_count(&state), 1);
        assert!(!goal.satisfied_by(&state));
        state
            .set(StateKey::AuditLogged, StateValue::Flag(true))
            .unwrap();
        assert!(goal.satisfied_by(&state));
    }

    #[test]
    fn score_comparisons() {
        let mut state = WorldState::initial();
        state
            .set(StateKey::ConfidenceScore, StateValue::score(0.45))
            .unwrap();
        assert!(Clause::score_lt(StateKey::ConfidenceScore, 0.65).satisfied_by(&state));
        assert!(!Clause::score_ge(StateKey::ConfidenceScore, 0.65).satisfied_by(&state));
        state
            .set(StateKey::ConfidenceScore, StateValue::score(0.65))
            .unwrap();
        assert!(Clause::score_ge(StateKey::ConfidenceScore, 0.65).satisfied_by(&state));
    }

    #[test]
    fn fitzpatrick_clauses() {
        let mut state = WorldState::initial();
        assert!(!Clause::fitzpatrick_known().satisfied_by(&state));
        state
            .set(
                StateKey::FitzpatrickType,
                StateValue::Fitzpatrick(Some(Fitzpatrick::IV)),
            )
            .unwrap();
        assert!(Clause::fitzpatrick_known().satisfied_by(&state));
        assert!(Clause::fitzpatrick_eq(Some(Fitzpatrick::IV)).satisfied_by(&state));
    }

    #[test]
    fn malformed_clauses_detected() {
        let bad = Clause {
            key: StateKey::LesionsDetected,
            op: CompareOp::Lt,
            value: StateValue::Flag(true),
        };
        assert!(!bad.is_well_formed());
        let ordered_flag = Clause {
            key: StateKey::LesionsDetected,
            op: CompareOp::Ge,
            value: StateValue::Flag(true),
        };
        assert!(!ordered_flag.is_well_formed());
        assert!(Clause::flag(StateKey::LesionsDetected, true).is_well_formed());
    }
}
