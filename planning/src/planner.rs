use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use derma_domain::{ActionCatalogue, Predicate, WorldState};

use crate::plan::Plan;

/// Search bounds. Both are part of the public contract: exceeding either
/// is reported to the caller, never silently retried.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Maximum number of expanded nodes.
    pub max_expansions: usize,
    /// Wall-clock search budget in milliseconds.
    pub plan_deadline_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_expansions: 10_000,
            plan_deadline_ms: 500,
        }
    }
}

/// Planner failure modes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The reachable state space was exhausted without satisfying the
    /// goal.
    #[error("no plan reaches the goal ({expanded} states expanded)")]
    NoPlanFound {
        /// States expanded before giving up.
        expanded: usize,
    },
    /// The expansion bound was hit.
    #[error("expansion limit of {limit} nodes exceeded")]
    ExpansionLimit {
        /// Configured bound.
        limit: usize,
    },
    /// The wall-clock bound was hit.
    #[error("planning deadline of {deadline_ms} ms exceeded")]
    DeadlineExceeded {
        /// Configured bound in milliseconds.
        deadline_ms: u64,
    },
}

/// Open-set entry. The heap is a max-heap, so ordering is reversed:
/// lowest `f`, then lowest `h`, then earliest insertion wins. The
/// three-way tie-break makes the search total and the output
/// byte-identical across runs and platforms.
#[derive(Debug, Clone, Copy)]
struct OpenNode {
    f: f64,
    h: f64,
    seq: u64,
    arena_index: usize,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.h.total_cmp(&self.h))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ArenaNode {
    state: WorldState,
    g: f64,
    parent: Option<(usize, usize)>,
}

/// A* planner over the world-state graph. The graph is a DAG because
/// catalogue validation forces every action to advance a completion
/// flag, so termination does not depend on the heuristic.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    /// Creates a planner with the given bounds.
    #[must_use]
    pub const fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Returns the minimum-cost action sequence from `initial` to a
    /// state satisfying `goal`, or an empty plan when the goal already
    /// holds.
    ///
    /// The heuristic counts unmet goal clauses, scaled by the smallest
    /// catalogue cost when that cost is below one; every unmet clause
    /// needs at least one action, so the estimate never overshoots.
    pub fn plan(
        &self,
        catalogue: &ActionCatalogue,
        initial: &WorldState,
        goal: &Predicate,
    ) -> Result<Plan, PlanError> {
        if goal.satisfied_by(initial) {
            return Ok(Plan::empty());
        }

        let h_scale = if catalogue.min_cost().is_finite() {
            catalogue.min_cost().min(1.0)
        } else {
            1.0
        };
        let heuristic = |state: &WorldState| {
            let unmet = goal.unmet_count(state);
            #[allow(clippy::cast_precision_loss)]
            let unmet = unmet as f64;
            unmet * h_scale
        };

        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.plan_deadline_ms);

        let mut arena: Vec<ArenaNode> = Vec::new();
        let mut best_g: HashMap<WorldState, f64> = HashMap::new();
        let mut open: BinaryHeap<OpenNode> = BinaryHeap::new();
        let mut seq: u64 = 0;

        arena.push(ArenaNode {
            state: initial.clone(),
            g: 0.0,
            parent: None,
        });
        best_g.insert(initial.clone(), 0.0);
        let h0 = heuristic(initial);
        open.push(OpenNode {
            f: h0,
            h: h0,
            seq,
            arena_index: 0,
        });

        let mut expanded = 0usize;
        while let Some(node) = open.pop() {
            let current = &arena[node.arena_index];
            // Lazy deletion: a cheaper route to this state superseded
            // the queued entry.
            if best_g
                .get(&current.state)
                .is_some_and(|g| *g < current.g)
            {
                continue;
            }
            if started.elapsed() >= deadline {
                return Err(PlanError::DeadlineExceeded {
                    deadline_ms: self.config.plan_deadline_ms,
                });
            }
            expanded += 1;
            if expanded > self.config.max_expansions {
                return Err(PlanError::ExpansionLimit {
                    limit: self.config.max_expansions,
                });
            }

            if goal.satisfied_by(&current.state) {
                return Ok(Self::reconstruct(catalogue, &arena, node.arena_index));
            }

            let current_g = current.g;
            let current_index = node.arena_index;
            let current_state = arena[current_index].state.clone();
            for (action_index, action) in catalogue.actions().iter().enumerate() {
                if !action.applicable_in(&current_state) {
                    continue;
                }
                let next_state = action.apply(&current_state);
                // Monotone effects mean a no-op application would loop
                // the node onto itself.
                if next_state == current_state {
                    continue;
                }
                let tentative = current_g + action.cost;
                let improved = best_g
                    .get(&next_state)
                    .is_none_or(|known| tentative < *known);
                if !improved {
                    continue;
                }
                best_g.insert(next_state.clone(), tentative);
                let h = heuristic(&next_state);
                arena.push(ArenaNode {
                    state: next_state,
                    g: tentative,
                    parent: Some((current_index, action_index)),
                });
                seq += 1;
                open.push(OpenNode {
                    f: tentative + h,
                    h,
                    seq,
                    arena_index: arena.len() - 1,
                });
            }
        }

        Err(PlanError::NoPlanFound { expanded })
    }

    fn reconstruct(
        catalogue: &ActionCatalogue,
        arena: &[ArenaNode],
        goal_index: usize,
    ) -> Plan {
        let mut steps = Vec::new();
        let mut cursor = goal_index;
        while let Some((parent, action_index)) = arena[cursor].parent {
            steps.push(catalogue.actions()[action_index].clone());
            cursor = parent;
        }
        steps.reverse();
        Plan::new(steps)
    }
}
