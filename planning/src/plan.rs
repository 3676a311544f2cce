use serde::{Deserialize, Serialize};
use thiserror::Error;

use derma_domain::{Action, Predicate, WorldState};

/// Soundness violation found while replaying a plan.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanViolation {
    /// A step's preconditions did not hold on the state reached by the
    /// prior steps.
    #[error("precondition of step {index} ({name}) does not hold")]
    PreconditionViolated {
        /// Zero-based step index.
        index: usize,
        /// Action name.
        name: String,
    },
    /// The final state does not satisfy the goal.
    #[error("final state does not satisfy the goal")]
    GoalUnsatisfied,
}

/// Ordered action sequence produced by the planner. Plans are value
/// objects: equal sequences compare equal, and the cost is the sum of
/// step costs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Plan {
    steps: Vec<Action>,
}

impl Plan {
    /// Empty plan (goal already satisfied).
    #[must_use]
    pub const fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    /// Builds a plan from ordered steps.
    #[must_use]
    pub fn new(steps: Vec<Action>) -> Self {
        Self { steps }
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Action] {
        &self.steps
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True for the empty plan.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total declared cost.
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.steps.iter().map(|step| step.cost).sum()
    }

    /// True when a step with the given action name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.steps.iter().any(|step| step.name == name)
    }

    /// Action names in execution order.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }

    /// Replays the plan from `initial`, verifying each step's
    /// preconditions and, finally, the goal. Returns the end state.
    pub fn simulate(
        &self,
        initial: &WorldState,
        goal: &Predicate,
    ) -> Result<WorldState, PlanViolation> {
        let mut state = initial.clone();
        for (index, step) in self.steps.iter().enumerate() {
            if !step.applicable_in(&state) {
                return Err(PlanViolation::PreconditionViolated {
                    index,
                    name: step.name.clone(),
                });
            }
            state = step.apply(&state);
        }
        if goal.satisfied_by(&state) {
            Ok(state)
        } else {
            Err(PlanViolation::GoalUnsatisfied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derma_domain::{AgentId, StateDelta, StateKey};

    fn step(name: &str, pre: Predicate, key: StateKey) -> Action {
        Action::builder(AgentId::Preprocessor, name)
            .preconditions(pre)
            .effects(StateDelta::new().with_flag(key, true))
            .build()
    }

    #[test]
    fn empty_plan_satisfies_vacuous_goal() {
        let plan = Plan::empty();
        let end = plan
            .simulate(&WorldState::initial(), &Predicate::always())
            .unwrap();
        assert_eq!(end, WorldState::initial());
    }

    #[test]
    fn simulate_detects_precondition_violation() {
        let plan = Plan::new(vec![step(
            "needs-calibration",
            Predicate::always().and_flag(StateKey::CalibrationComplete, true),
            StateKey::PreprocessingComplete,
        )]);
        let err = plan
            .simulate(&WorldState::initial(), &Predicate::always())
            .unwrap_err();
        assert_eq!(
            err,
            PlanViolation::PreconditionViolated {
                index: 0,
                name: "needs-calibration".into()
            }
        );
    }

    #[test]
    fn simulate_checks_goal() {
        let plan = Plan::new(vec![step(
            "gate",
            Predicate::always(),
            StateKey::QualityAssessed,
        )]);
        let goal = Predicate::always().and_flag(StateKey::AuditLogged, true);
        assert_eq!(
            plan.simulate(&WorldState::initial(), &goal).unwrap_err(),
            PlanViolation::GoalUnsatisfied
        );
    }

    #[test]
    fn cost_is_sum_of_steps() {
        let mut cheap = step("gate", Predicate::always(), StateKey::QualityAssessed);
        cheap.cost = 1.5;
        let mut pricey = step("other", Predicate::always(), StateKey::SkinToneDetected);
        pricey.cost = 2.5;
        let plan = Plan::new(vec![cheap, pricey]);
        assert!((plan.total_cost() - 4.0).abs() < f64::EPSILON);
    }
}
