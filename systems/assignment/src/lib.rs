#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Assignment of generated route items to rescue agents.
//!
//! Two interchangeable strategies share the [`AssignmentStrategy`] contract:
//! a greedy packer that walks items by value density, and an LP-relaxation
//! packer that solves the fractional problem, rounds it and falls back to the
//! greedy packer whenever the solver gives up. Both never claim more people
//! from a room than it holds and leave agents without work as explicitly
//! idle (an empty item list).

use std::collections::BTreeMap;

use fire_rescue_core::{AgentId, RouteItem, VertexId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

mod simplex;

pub use simplex::LpError;
use simplex::{maximize, PackingProblem};

/// Ordered items per agent; every requested agent has an entry.
pub type Assignment = BTreeMap<AgentId, Vec<RouteItem>>;

/// Contract shared by every assignment strategy.
pub trait AssignmentStrategy {
    /// Selects items for the agents without exceeding `remaining` per room.
    fn assign(
        &self,
        items: &[RouteItem],
        agents: &[AgentId],
        remaining: &BTreeMap<VertexId, u32>,
    ) -> Assignment;
}

/// Strategy selector exposed through configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignerKind {
    /// Value-density greedy packing.
    #[default]
    Greedy,
    /// LP relaxation followed by greedy rounding.
    Lp,
}

/// Knobs controlling assignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignerTuning {
    /// Strategy used at the phase transition.
    pub strategy: AssignerKind,
    /// Fractional values at or below this are treated as unselected.
    pub threshold: f64,
    /// Pivot cap for the simplex solver.
    pub max_pivots: usize,
    /// Largest number of items handed to the solver.
    pub max_variables: usize,
}

impl Default for AssignerTuning {
    fn default() -> Self {
        Self {
            strategy: AssignerKind::Greedy,
            threshold: 1e-3,
            max_pivots: 50_000,
            max_variables: 1_500,
        }
    }
}

/// Builds the strategy selected by the tuning.
#[must_use]
pub fn assigner_for(tuning: &AssignerTuning) -> Box<dyn AssignmentStrategy + Send + Sync> {
    match tuning.strategy {
        AssignerKind::Greedy => Box::new(GreedyAssigner),
        AssignerKind::Lp => Box::new(LpAssigner::new(tuning.clone())),
    }
}

/// Greedy packer: highest value density first, fewest-items agent wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct GreedyAssigner;

impl AssignmentStrategy for GreedyAssigner {
    fn assign(
        &self,
        items: &[RouteItem],
        agents: &[AgentId],
        remaining: &BTreeMap<VertexId, u32>,
    ) -> Assignment {
        let mut assignment = empty_assignment(agents);
        if agents.is_empty() {
            return assignment;
        }

        let mut ranked: Vec<&RouteItem> = items.iter().collect();
        ranked.sort_by(|a, b| {
            b.value()
                .total_cmp(&a.value())
                .then_with(|| a.time().total_cmp(&b.time()))
                .then_with(|| a.vector().cmp(b.vector()))
        });

        let mut left = remaining.clone();
        for item in ranked {
            if !claim(item, &mut left) {
                continue;
            }
            let target = assignment
                .iter()
                .min_by_key(|(agent, queue)| (queue.len(), **agent))
                .map(|(agent, _)| *agent);
            if let Some(queue) = target.and_then(|agent| assignment.get_mut(&agent)) {
                queue.push(item.clone());
            }
        }
        assignment
    }
}

/// LP-relaxation packer with greedy rounding and greedy fallback.
#[derive(Clone, Debug, Default)]
pub struct LpAssigner {
    tuning: AssignerTuning,
}

impl LpAssigner {
    /// Creates an LP assigner using the provided tuning.
    #[must_use]
    pub fn new(tuning: AssignerTuning) -> Self {
        Self { tuning }
    }

    /// Solves the relaxation and returns the fractional value of every item.
    pub fn relax(
        &self,
        items: &[RouteItem],
        remaining: &BTreeMap<VertexId, u32>,
    ) -> Result<Vec<f64>, LpError> {
        if items.len() > self.tuning.max_variables {
            return Err(LpError::TooLarge {
                variables: items.len(),
                limit: self.tuning.max_variables,
            });
        }

        let mut rooms: Vec<VertexId> = items
            .iter()
            .flat_map(|item| item.vector().keys().copied())
            .collect();
        rooms.sort();
        rooms.dedup();

        let mut problem = PackingProblem {
            objective: items.iter().map(RouteItem::value).collect(),
            ..PackingProblem::default()
        };
        for room in &rooms {
            let row = items
                .iter()
                .map(|item| f64::from(item.count_for(*room)))
                .collect();
            let bound = remaining.get(room).copied().unwrap_or(0);
            problem.rows.push(row);
            problem.bounds.push(f64::from(bound));
        }
        for index in 0..items.len() {
            let mut row = vec![0.0; items.len()];
            row[index] = 1.0;
            problem.rows.push(row);
            problem.bounds.push(1.0);
        }

        maximize(&problem, self.tuning.max_pivots)
    }
}

impl AssignmentStrategy for LpAssigner {
    fn assign(
        &self,
        items: &[RouteItem],
        agents: &[AgentId],
        remaining: &BTreeMap<VertexId, u32>,
    ) -> Assignment {
        if agents.is_empty() {
            return empty_assignment(agents);
        }

        let fractions = match self.relax(items, remaining) {
            Ok(fractions) => fractions,
            Err(error) => {
                warn!(%error, "LP relaxation failed, falling back to greedy assignment");
                return GreedyAssigner.assign(items, agents, remaining);
            }
        };

        let mut candidates: Vec<(usize, f64)> = fractions
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, fraction)| *fraction > self.tuning.threshold)
            .collect();
        candidates.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| items[b.0].value().total_cmp(&items[a.0].value()))
                .then_with(|| a.0.cmp(&b.0))
        });
        debug!(
            items = items.len(),
            candidates = candidates.len(),
            "rounding LP relaxation"
        );

        let mut left = remaining.clone();
        let selected: Vec<&RouteItem> = candidates
            .into_iter()
            .map(|(index, _)| &items[index])
            .filter(|item| claim(item, &mut left))
            .collect();

        let mut assignment = empty_assignment(agents);
        let mut load: BTreeMap<AgentId, f64> = agents.iter().map(|agent| (*agent, 0.0)).collect();
        for item in selected {
            let target = load
                .iter()
                .min_by(|a, b| {
                    a.1.total_cmp(b.1).then_with(|| {
                        let a_len = assignment.get(a.0).map_or(0, Vec::len);
                        let b_len = assignment.get(b.0).map_or(0, Vec::len);
                        a_len.cmp(&b_len).then_with(|| a.0.cmp(b.0))
                    })
                })
                .map(|(agent, _)| *agent);
            let Some(agent) = target else {
                continue;
            };
            if let Some(total) = load.get_mut(&agent) {
                *total += item.time();
            }
            if let Some(queue) = assignment.get_mut(&agent) {
                queue.push(item.clone());
            }
        }
        assignment
    }
}

/// Reports whether the combined vectors of the assignment fit `remaining`.
#[must_use]
pub fn is_feasible(assignment: &Assignment, remaining: &BTreeMap<VertexId, u32>) -> bool {
    let mut claimed: BTreeMap<VertexId, u32> = BTreeMap::new();
    for item in assignment.values().flatten() {
        for (room, count) in item.vector() {
            *claimed.entry(*room).or_default() += count;
        }
    }
    claimed
        .iter()
        .all(|(room, count)| *count <= remaining.get(room).copied().unwrap_or(0))
}

/// Reports whether no agent received any work.
#[must_use]
pub fn is_empty(assignment: &Assignment) -> bool {
    assignment.values().all(Vec::is_empty)
}

fn empty_assignment(agents: &[AgentId]) -> Assignment {
    agents.iter().map(|agent| (*agent, Vec::new())).collect()
}

/// Deducts the item's vector from `left` if every room can supply it.
fn claim(item: &RouteItem, left: &mut BTreeMap<VertexId, u32>) -> bool {
    let fits = item
        .vector()
        .iter()
        .all(|(room, count)| left.get(room).copied().unwrap_or(0) >= *count);
    if !fits {
        return false;
    }
    for (room, count) in item.vector() {
        if let Some(available) = left.get_mut(room) {
            *available -= count;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use fire_rescue_core::RouteItemParts;

    use super::*;

    fn v(id: u32) -> VertexId {
        VertexId::new(id)
    }

    fn item(rooms: &[(u32, u32)], time: f64, value: f64) -> RouteItem {
        let order: Vec<VertexId> = rooms.iter().map(|(room, _)| v(*room)).collect();
        let mut path = vec![v(0)];
        path.extend(order.iter().copied());
        path.push(v(0));
        RouteItem::new(
            RouteItemParts {
                vector: rooms
                    .iter()
                    .map(|(room, count)| (v(*room), *count))
                    .collect(),
                visiting_order: order,
                entry_exit: v(0),
                drop_exit: v(0),
                path,
                time,
                value,
                penalty_factor: 1.0,
            },
            3,
        )
        .expect("valid item")
    }

    fn agents(count: u32) -> Vec<AgentId> {
        (0..count).map(AgentId::new).collect()
    }

    #[test]
    fn greedy_skips_items_that_overclaim_rooms() {
        let items = vec![
            item(&[(1, 2)], 4.0, 0.5),
            item(&[(1, 1), (2, 1)], 6.0, 0.4),
            item(&[(2, 1)], 4.0, 0.25),
        ];
        let remaining = BTreeMap::from([(v(1), 2), (v(2), 1)]);

        let assignment = GreedyAssigner.assign(&items, &agents(2), &remaining);

        assert!(is_feasible(&assignment, &remaining));
        let total: usize = assignment.values().map(Vec::len).sum();
        assert_eq!(total, 2);
        assert_eq!(assignment[&AgentId::new(0)][0].count_for(v(1)), 2);
        assert_eq!(assignment[&AgentId::new(1)][0].count_for(v(2)), 1);
    }

    #[test]
    fn greedy_leaves_surplus_agents_idle() {
        let items = vec![item(&[(1, 1)], 4.0, 0.5)];
        let remaining = BTreeMap::from([(v(1), 1)]);
        let assignment = GreedyAssigner.assign(&items, &agents(3), &remaining);
        assert_eq!(assignment.len(), 3);
        assert_eq!(assignment.values().filter(|queue| queue.is_empty()).count(), 2);
    }

    #[test]
    fn lp_prefers_combination_with_higher_total_value() {
        // Greedy grabs the densest item and blocks both others; the LP sees
        // that the pair is worth more in total.
        let items = vec![
            item(&[(1, 1), (2, 1)], 4.0, 1.0),
            item(&[(1, 1)], 4.0, 0.8),
            item(&[(2, 1)], 4.0, 0.8),
        ];
        let remaining = BTreeMap::from([(v(1), 1), (v(2), 1)]);

        let greedy = GreedyAssigner.assign(&items, &agents(2), &remaining);
        let lp = LpAssigner::default().assign(&items, &agents(2), &remaining);

        let value = |assignment: &Assignment| -> f64 {
            assignment.values().flatten().map(RouteItem::value).sum()
        };
        assert!((value(&greedy) - 1.0).abs() < 1e-9);
        assert!((value(&lp) - 1.6).abs() < 1e-9);
        assert!(is_feasible(&lp, &remaining));
    }

    #[test]
    fn lp_spreads_items_by_running_time() {
        let items = vec![
            item(&[(1, 1)], 10.0, 0.9),
            item(&[(2, 1)], 2.0, 0.8),
            item(&[(3, 1)], 2.0, 0.7),
        ];
        let remaining = BTreeMap::from([(v(1), 1), (v(2), 1), (v(3), 1)]);
        let assignment = LpAssigner::default().assign(&items, &agents(2), &remaining);

        let times: Vec<f64> = assignment
            .values()
            .map(|queue| queue.iter().map(RouteItem::time).sum())
            .collect();
        assert_eq!(times.len(), 2);
        assert!(times.contains(&10.0));
        assert!(times.contains(&4.0));
    }

    #[test]
    fn lp_falls_back_to_greedy_when_solver_refuses() {
        let items = vec![item(&[(1, 1)], 4.0, 0.5), item(&[(2, 1)], 4.0, 0.4)];
        let remaining = BTreeMap::from([(v(1), 1), (v(2), 1)]);
        let tiny = LpAssigner::new(AssignerTuning {
            strategy: AssignerKind::Lp,
            max_variables: 1,
            ..AssignerTuning::default()
        });

        assert!(matches!(
            tiny.relax(&items, &remaining),
            Err(LpError::TooLarge { .. })
        ));
        let fallback = tiny.assign(&items, &agents(1), &remaining);
        let greedy = GreedyAssigner.assign(&items, &agents(1), &remaining);
        assert_eq!(fallback, greedy);
    }
}
