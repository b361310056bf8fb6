#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Per-tick entry point of the fire rescue planner.
//!
//! The orchestrator starts in [`Phase::Exploration`], delegating every tick
//! to the exploration coordinator. Once every room has been visited (or the
//! sweep stalled) and no reachable self-capable occupant is left
//! uninstructed, it runs the rescue planning batch exactly once and hands the
//! resulting assignment to the execution coordinator for the rest of the run.

use std::collections::{BTreeMap, BTreeSet};

use fire_rescue_core::{
    ActionBudget, AgentActions, AgentId, Phase, RouteItem, StateSnapshot, VertexId,
};
use fire_rescue_system_assignment::{assigner_for, is_empty, AssignerTuning, Assignment};
use fire_rescue_system_distance::{all_pairs, hop_distances, reachable_exits, UNLOADED};
use fire_rescue_system_execution::ExecutionCoordinator;
use fire_rescue_system_exploration::{ExplorationCoordinator, ExplorationStatus, ExplorationTuning};
use fire_rescue_system_route_items::{
    fire_proximity, GenerationInput, GenerationStats, GeneratorTuning, RoomDemand,
    RouteItemGenerator,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Aggregated tuning for every planning stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerTuning {
    /// Route item scoring.
    pub generator: GeneratorTuning,
    /// Item assignment strategy.
    pub assigner: AssignerTuning,
    /// Exploration sweep.
    pub exploration: ExplorationTuning,
    /// Actions each agent may take per tick.
    pub action_budget: ActionBudget,
}

/// Output of the one-time rescue planning batch.
#[derive(Clone, Debug)]
pub struct RescuePlan {
    /// Incapacitated occupants per room the plan was built for.
    pub demand: BTreeMap<VertexId, u32>,
    /// Every generated item, best first.
    pub items: Vec<RouteItem>,
    /// Work counters of the generation pass.
    pub stats: GenerationStats,
    /// Items selected per agent.
    pub assignment: Assignment,
}

impl RescuePlan {
    /// People the assignment will carry out.
    #[must_use]
    pub fn assigned_people(&self) -> u32 {
        self.assignment
            .values()
            .flatten()
            .map(RouteItem::people)
            .sum()
    }
}

/// Runs distance precomputation, item generation and assignment.
///
/// Returns `None` when nothing can be planned: no incapacitated occupants
/// were discovered, no agent can reach an exit, no item survived generation
/// or the assigner selected nothing.
#[must_use]
pub fn plan_rescue(
    snapshot: &StateSnapshot,
    tuning: &PlannerTuning,
    fire_origin: Option<VertexId>,
) -> Option<RescuePlan> {
    let graph = &snapshot.graph;
    let remaining = snapshot.incapable_by_room();
    if remaining.is_empty() {
        debug!(
            tick = snapshot.tick,
            "no incapacitated occupants discovered"
        );
        return None;
    }

    let active: Vec<_> = snapshot
        .agents
        .iter()
        .filter(|agent| !reachable_exits(graph, agent.position).is_empty())
        .collect();
    let Some(capacity) = active.iter().map(|agent| agent.capacity).min() else {
        warn!(
            tick = snapshot.tick,
            "no agent can reach an exit, rescue cannot be planned"
        );
        return None;
    };
    let agents: Vec<AgentId> = active.iter().map(|agent| agent.id).collect();

    let demand: BTreeMap<VertexId, RoomDemand> = remaining
        .iter()
        .map(|(room, incapable)| {
            let priority = graph.vertex(*room).map_or(1.0, |vertex| vertex.priority());
            (
                *room,
                RoomDemand {
                    incapable: *incapable,
                    priority,
                },
            )
        })
        .collect();
    let exits: Vec<VertexId> = graph.exits().collect();
    let distances = all_pairs(graph, demand.keys().copied(), UNLOADED);
    let proximity = fire_origin.map(|origin| fire_proximity(graph, origin));

    let generator = RouteItemGenerator::new(tuning.generator.clone());
    let generation = generator.generate(&GenerationInput {
        demand: &demand,
        exits: &exits,
        distances: &distances,
        proximity: proximity.as_ref(),
        capacity,
    });
    if generation.items.is_empty() {
        debug!(tick = snapshot.tick, "no route items generated");
        return None;
    }

    let assigner = assigner_for(&tuning.assigner);
    let assignment = assigner.assign(&generation.items, &agents, &remaining);
    if is_empty(&assignment) {
        debug!(tick = snapshot.tick, "assigner selected no items");
        return None;
    }

    Some(RescuePlan {
        demand: remaining,
        items: generation.items,
        stats: generation.stats,
        assignment,
    })
}

/// Reports whether the sweep allows the transition to optimized rescue.
///
/// The sweep must be finished and no discovered self-capable occupant may be
/// waiting for instructions at a vertex some agent can still reach.
#[must_use]
pub fn transition_ready(snapshot: &StateSnapshot, status: &ExplorationStatus) -> bool {
    if !status.is_finished() {
        return false;
    }
    let reachable: BTreeSet<VertexId> = snapshot
        .agents
        .iter()
        .flat_map(|agent| hop_distances(&snapshot.graph, agent.position).into_keys())
        .collect();
    !snapshot
        .occupants
        .iter()
        .any(|(vertex, counts)| counts.capable > 0 && reachable.contains(vertex))
}

/// Phase state machine owning both coordinators.
#[derive(Clone, Debug)]
pub struct PhaseOrchestrator {
    tuning: PlannerTuning,
    fire_origin: Option<VertexId>,
    phase: Phase,
    exploration: ExplorationCoordinator,
    execution: ExecutionCoordinator,
    plan: Option<RescuePlan>,
    switched_at: Option<u64>,
    plan_unavailable: bool,
}

impl PhaseOrchestrator {
    /// Creates an orchestrator in the exploration phase.
    #[must_use]
    pub fn new(tuning: PlannerTuning) -> Self {
        let exploration =
            ExplorationCoordinator::new(tuning.exploration.clone(), tuning.action_budget);
        let execution = ExecutionCoordinator::new(tuning.action_budget);
        Self {
            tuning,
            fire_origin: None,
            phase: Phase::Exploration,
            exploration,
            execution,
            plan: None,
            switched_at: None,
            plan_unavailable: false,
        }
    }

    /// Returns the orchestrator weighting rooms by proximity to `origin`.
    #[must_use]
    pub fn with_fire_origin(mut self, origin: Option<VertexId>) -> Self {
        self.fire_origin = origin;
        self
    }

    /// Active phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Tick at which optimized rescue started, if it has.
    #[must_use]
    pub const fn switched_at(&self) -> Option<u64> {
        self.switched_at
    }

    /// Plan produced at the transition.
    #[must_use]
    pub fn rescue_plan(&self) -> Option<&RescuePlan> {
        self.plan.as_ref()
    }

    /// Exploration coordinator state.
    #[must_use]
    pub fn exploration(&self) -> &ExplorationCoordinator {
        &self.exploration
    }

    /// Execution coordinator state.
    #[must_use]
    pub fn execution(&self) -> &ExecutionCoordinator {
        &self.execution
    }

    /// Tuning the orchestrator was built with.
    #[must_use]
    pub fn tuning(&self) -> &PlannerTuning {
        &self.tuning
    }

    /// Decides this tick's actions for every agent.
    pub fn tick(&mut self, snapshot: &StateSnapshot) -> AgentActions {
        let mut actions = AgentActions::new();
        match self.phase {
            Phase::Exploration => {
                let status = self.exploration.handle(snapshot, &mut actions);
                self.plan_unavailable = false;
                if !transition_ready(snapshot, &status) {
                    return actions;
                }

                let Some(plan) = plan_rescue(snapshot, &self.tuning, self.fire_origin) else {
                    self.plan_unavailable = true;
                    return actions;
                };
                info!(
                    tick = snapshot.tick,
                    items = plan.items.len(),
                    people = plan.assigned_people(),
                    pruned = plan.stats.pruned,
                    "switching to optimized rescue"
                );
                self.execution.load(plan.assignment.clone());
                self.plan = Some(plan);
                self.phase = Phase::OptimizedRescue;
                self.switched_at = Some(snapshot.tick);

                actions.clear();
                self.execution.handle(snapshot, &mut actions);
            }
            Phase::OptimizedRescue => self.execution.handle(snapshot, &mut actions),
        }
        actions
    }

    /// Reports whether nothing is left for the planner to do.
    ///
    /// Rescue is finished once every plan completed and nobody who can still
    /// reach an exit is carrying anyone. Exploration is finished when the
    /// sweep is over and the last planning attempt found nothing to rescue.
    #[must_use]
    pub fn is_finished(&self, snapshot: &StateSnapshot) -> bool {
        match self.phase {
            Phase::OptimizedRescue => {
                let trapped = self.execution.trapped();
                self.execution.is_idle()
                    && snapshot
                        .agents
                        .iter()
                        .all(|agent| agent.carrying == 0 || trapped.contains(&agent.id))
            }
            Phase::Exploration => self.plan_unavailable,
        }
    }
}
