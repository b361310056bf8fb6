#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative scripted environment for the fire rescue planner.
//!
//! The world owns the building graph, the ground-truth occupants and the
//! agents. It has no combustion model: edges burn on the scenario schedule
//! and occupants are sampled once from the configured ranges. Agents only
//! learn about occupants at vertices they have entered.

use std::collections::{BTreeMap, BTreeSet};

use fire_rescue_core::{
    Action, ActionBudget, ActionOutcome, ActionStatus, AgentActions, AgentId, EdgeKey, Environment,
    Graph, OccupantCounts, RejectReason, StateSnapshot, TickResult, VertexId,
};
use fire_rescue_system_distance::reachable_exits;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

mod config;

pub use config::{
    AgentConfig, BurnEvent, EdgeConfig, OccupantRange, ScenarioConfig, ScenarioError, VertexConfig,
};

/// Agent state owned by the world.
#[derive(Clone, Debug)]
struct Agent {
    id: AgentId,
    position: VertexId,
    carrying: u32,
    capacity: u32,
    visited: BTreeSet<VertexId>,
}

/// Running totals of people brought out of the building.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    /// Self-capable occupants that walked out after being instructed.
    pub evacuated: u32,
    /// Incapacitated occupants dropped at an exit.
    pub rescued: u32,
}

/// Represents the authoritative fire rescue world state.
#[derive(Clone, Debug)]
pub struct World {
    graph: Graph,
    fire_origin: Option<VertexId>,
    agents: Vec<Agent>,
    occupants: BTreeMap<VertexId, OccupantCounts>,
    burns: BTreeMap<u64, Vec<EdgeKey>>,
    budget: ActionBudget,
    tally: Tally,
    tick: u64,
}

impl World {
    /// Builds the world described by `config`, sampling occupants with `seed`.
    pub fn from_config(config: &ScenarioConfig, seed: u64) -> Result<Self, ScenarioError> {
        let graph = config.build_graph()?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut occupants: BTreeMap<VertexId, OccupantCounts> = BTreeMap::new();
        for range in &config.occupants {
            let counts = occupants.entry(VertexId::new(range.vertex)).or_default();
            counts.capable += rng.gen_range(range.capable[0]..=range.capable[1]);
            counts.incapable += rng.gen_range(range.incapable[0]..=range.incapable[1]);
        }

        let agents = config
            .agents
            .iter()
            .zip(0_u32..)
            .map(|(agent, index)| {
                let start = VertexId::new(agent.start);
                Agent {
                    id: AgentId::new(index),
                    position: start,
                    carrying: 0,
                    capacity: agent.capacity,
                    visited: BTreeSet::from([start]),
                }
            })
            .collect();

        let mut burns: BTreeMap<u64, Vec<EdgeKey>> = BTreeMap::new();
        for burn in &config.burns {
            burns.entry(burn.tick).or_default().push(burn.key());
        }

        Ok(Self {
            graph,
            fire_origin: config.fire_origin.map(VertexId::new),
            agents,
            occupants,
            burns,
            budget: ActionBudget::DEFAULT,
            tally: Tally::default(),
            tick: 0,
        })
    }

    /// Returns the world with a different per-agent action budget.
    #[must_use]
    pub fn with_budget(mut self, budget: ActionBudget) -> Self {
        self.budget = budget;
        self
    }

    fn agent_index(&self, id: AgentId) -> Option<usize> {
        self.agents.iter().position(|agent| agent.id == id)
    }

    fn execute(&mut self, index: usize, action: Action) -> Result<(), RejectReason> {
        let agent = &mut self.agents[index];
        match action {
            Action::Move { target } => {
                if !self.graph.is_adjacent(agent.position, target) {
                    return Err(RejectReason::NotAdjacent);
                }
                if !self.graph.is_traversable(agent.position, target) {
                    return Err(RejectReason::EdgeBurned);
                }
                agent.position = target;
                let _ = agent.visited.insert(target);
            }
            Action::Instruct => {
                let counts = self.occupants.entry(agent.position).or_default();
                if counts.capable == 0 {
                    return Err(RejectReason::NothingToInstruct);
                }
                counts.instructed += counts.capable;
                counts.capable = 0;
            }
            Action::PickUp { count } => {
                let counts = self.occupants.entry(agent.position).or_default();
                if count == 0 || counts.incapable < count {
                    return Err(RejectReason::InsufficientOccupants);
                }
                if agent.carrying + count > agent.capacity {
                    return Err(RejectReason::OverCapacity);
                }
                counts.incapable -= count;
                agent.carrying += count;
            }
            Action::DropOff => {
                if !self
                    .graph
                    .vertex(agent.position)
                    .is_some_and(|vertex| vertex.is_exit())
                {
                    return Err(RejectReason::NotAnExit);
                }
                if agent.carrying == 0 {
                    return Err(RejectReason::NothingCarried);
                }
                self.tally.rescued += agent.carrying;
                agent.carrying = 0;
            }
        }
        Ok(())
    }

    /// Instructed occupants with a route to any exit leave the building.
    fn release_instructed(&mut self) {
        for (vertex, counts) in &mut self.occupants {
            if counts.instructed == 0 || reachable_exits(&self.graph, *vertex).is_empty() {
                continue;
            }
            self.tally.evacuated += counts.instructed;
            counts.instructed = 0;
        }
    }

    fn burn_scheduled(&mut self) -> Vec<EdgeKey> {
        let scheduled = self.burns.remove(&self.tick).unwrap_or_default();
        scheduled
            .into_iter()
            .filter(|key| self.graph.burn(*key))
            .collect()
    }
}

/// Applies one tick of agent actions to the world, mutating state deterministically.
///
/// Actions are resolved per agent in identifier order and per agent in
/// submission order. Actions beyond the budget are rejected. Instructed
/// occupants leave and scheduled edges burn once every action is resolved.
pub fn apply(world: &mut World, actions: &AgentActions) -> TickResult {
    let mut outcomes = Vec::new();
    for (agent, batch) in actions {
        let index = world.agent_index(*agent);
        for (position, action) in batch.iter().enumerate() {
            let status = match index {
                None => ActionStatus::Rejected(RejectReason::UnknownAgent),
                Some(_) if position >= world.budget.limit() => {
                    ActionStatus::Rejected(RejectReason::BudgetExceeded)
                }
                Some(index) => match world.execute(index, *action) {
                    Ok(()) => ActionStatus::Applied,
                    Err(reason) => ActionStatus::Rejected(reason),
                },
            };
            outcomes.push(ActionOutcome {
                agent: *agent,
                action: *action,
                status,
            });
        }
    }

    world.release_instructed();
    let burned = world.burn_scheduled();
    if !burned.is_empty() {
        debug!(tick = world.tick, edges = ?burned, "edges burned");
    }

    let result = TickResult {
        tick: world.tick,
        outcomes,
        burned,
    };
    world.tick += 1;
    result
}

impl Environment for World {
    fn read(&self) -> StateSnapshot {
        query::snapshot(self)
    }

    fn apply(&mut self, actions: &AgentActions) -> TickResult {
        apply(self, actions)
    }
}

/// Query functions that provide read-only access to the world state.
pub mod query {
    use std::collections::{BTreeMap, BTreeSet};

    use super::{Tally, World};
    use fire_rescue_core::{AgentSnapshot, EdgeKey, Graph, OccupantCounts, StateSnapshot, VertexId};

    /// Captures the planner view: occupants are only reported where visited.
    #[must_use]
    pub fn snapshot(world: &World) -> StateSnapshot {
        let visited: BTreeSet<VertexId> = world
            .agents
            .iter()
            .flat_map(|agent| agent.visited.iter().copied())
            .collect();
        let occupants: BTreeMap<VertexId, OccupantCounts> = world
            .occupants
            .iter()
            .filter(|(vertex, _)| visited.contains(vertex))
            .map(|(vertex, counts)| (*vertex, *counts))
            .collect();
        StateSnapshot {
            tick: world.tick,
            graph: world.graph.clone(),
            agents: world
                .agents
                .iter()
                .map(|agent| AgentSnapshot {
                    id: agent.id,
                    position: agent.position,
                    carrying: agent.carrying,
                    capacity: agent.capacity,
                    visited: agent.visited.clone(),
                })
                .collect(),
            occupants,
        }
    }

    /// Index of the next tick to be applied.
    #[must_use]
    pub fn tick(world: &World) -> u64 {
        world.tick
    }

    /// Current building graph including burned edges.
    #[must_use]
    pub fn graph(world: &World) -> &Graph {
        &world.graph
    }

    /// Vertex the fire started from, if the scenario declares one.
    #[must_use]
    pub fn fire_origin(world: &World) -> Option<VertexId> {
        world.fire_origin
    }

    /// People brought out so far.
    #[must_use]
    pub fn tally(world: &World) -> Tally {
        world.tally
    }

    /// Edges burned so far.
    #[must_use]
    pub fn burned_edges(world: &World) -> BTreeSet<EdgeKey> {
        world.graph.burned_edges()
    }

    /// Ground-truth occupants still inside, summed over every vertex.
    #[must_use]
    pub fn remaining(world: &World) -> OccupantCounts {
        world
            .occupants
            .values()
            .fold(OccupantCounts::default(), |mut total, counts| {
                total.capable += counts.capable;
                total.incapable += counts.incapable;
                total.instructed += counts.instructed;
                total
            })
    }

    /// Incapacitated occupants currently carried by agents.
    #[must_use]
    pub fn carried(world: &World) -> u32 {
        world.agents.iter().map(|agent| agent.carrying).sum()
    }

    /// Ground-truth occupants everywhere, ignoring what agents have seen.
    #[must_use]
    pub fn occupants(world: &World) -> &BTreeMap<VertexId, OccupantCounts> {
        &world.occupants
    }
}

#[cfg(test)]
mod tests {
    use fire_rescue_core::GraphError;

    use super::*;

    const SCENARIO: &str = r#"
        name = "corridor"
        fire_origin = 3

        [[vertices]]
        id = 0
        kind = "exit"

        [[vertices]]
        id = 1
        kind = "corridor"

        [[vertices]]
        id = 2
        kind = "room"
        priority = 2.0

        [[vertices]]
        id = 3
        kind = "room"

        [[edges]]
        between = [0, 1]

        [[edges]]
        between = [1, 2]
        length = 2.5

        [[edges]]
        between = [1, 3]

        [[occupants]]
        vertex = 2
        capable = [2, 2]
        incapable = [3, 3]

        [[occupants]]
        vertex = 3
        incapable = [0, 4]

        [[agents]]
        start = 0

        [[burns]]
        tick = 1
        edge = [3, 1]
    "#;

    fn world() -> World {
        let config = ScenarioConfig::from_toml_str(SCENARIO).expect("scenario parses");
        World::from_config(&config, 7).expect("world builds")
    }

    fn move_to(id: u32) -> Action {
        Action::Move {
            target: VertexId::new(id),
        }
    }

    fn batch(actions: Vec<Action>) -> AgentActions {
        AgentActions::from([(AgentId::new(0), actions)])
    }

    fn statuses(result: &TickResult) -> Vec<ActionStatus> {
        result
            .outcomes
            .iter()
            .map(|outcome| outcome.status)
            .collect()
    }

    #[test]
    fn occupants_are_hidden_until_visited() {
        let mut world = world();
        assert!(world.read().occupants.is_empty());

        let _ = apply(&mut world, &batch(vec![move_to(1), move_to(2)]));
        let snapshot = world.read();
        assert_eq!(snapshot.occupants_at(VertexId::new(2)).incapable, 3);
        assert!(!snapshot.occupants.contains_key(&VertexId::new(3)));
    }

    #[test]
    fn actions_beyond_budget_are_rejected() {
        let mut world = world();
        let result = apply(
            &mut world,
            &batch(vec![move_to(1), move_to(2), Action::Instruct]),
        );
        assert_eq!(
            statuses(&result),
            vec![
                ActionStatus::Applied,
                ActionStatus::Applied,
                ActionStatus::Rejected(RejectReason::BudgetExceeded),
            ]
        );
    }

    #[test]
    fn rescue_cycle_updates_tally() {
        let mut world = world();
        let _ = apply(&mut world, &batch(vec![move_to(1), move_to(2)]));
        let result = apply(
            &mut world,
            &batch(vec![Action::Instruct, Action::PickUp { count: 4 }]),
        );
        assert_eq!(
            statuses(&result),
            vec![
                ActionStatus::Applied,
                ActionStatus::Rejected(RejectReason::InsufficientOccupants),
            ]
        );
        assert_eq!(query::tally(&world).evacuated, 2);

        let _ = apply(&mut world, &batch(vec![Action::PickUp { count: 3 }]));
        let result = apply(&mut world, &batch(vec![Action::DropOff, move_to(1)]));
        assert_eq!(
            result.outcomes[0].status,
            ActionStatus::Rejected(RejectReason::NotAnExit)
        );

        let _ = apply(&mut world, &batch(vec![move_to(0), Action::DropOff]));
        assert_eq!(query::tally(&world).rescued, 3);
        assert_eq!(query::carried(&world), 0);
    }

    #[test]
    fn scheduled_edges_burn_at_end_of_tick() {
        let mut world = world();
        let first = apply(&mut world, &AgentActions::new());
        assert!(first.burned.is_empty());

        let second = apply(&mut world, &batch(vec![move_to(1)]));
        let key = EdgeKey::new(VertexId::new(1), VertexId::new(3));
        assert_eq!(second.burned, vec![key]);
        assert!(query::burned_edges(&world).contains(&key));

        let third = apply(&mut world, &batch(vec![move_to(3)]));
        assert_eq!(
            statuses(&third),
            vec![ActionStatus::Rejected(RejectReason::EdgeBurned)]
        );
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let config = ScenarioConfig::from_toml_str(SCENARIO).expect("scenario parses");
        let a = World::from_config(&config, 11).expect("world builds");
        let b = World::from_config(&config, 11).expect("world builds");
        assert_eq!(query::occupants(&a), query::occupants(&b));
        let sampled = query::occupants(&a)[&VertexId::new(3)].incapable;
        assert!(sampled <= 4);
    }

    #[test]
    fn malformed_scenarios_are_rejected() {
        let inverted = SCENARIO.replace("incapable = [0, 4]", "incapable = [4, 0]");
        assert!(matches!(
            ScenarioConfig::from_toml_str(&inverted),
            Err(ScenarioError::InvertedRange { vertex: 3, .. })
        ));

        let stray_agent = SCENARIO.replace("start = 0", "start = 42");
        assert!(matches!(
            ScenarioConfig::from_toml_str(&stray_agent),
            Err(ScenarioError::UnknownStart { vertex: 42, .. })
        ));

        let stray_burn = SCENARIO.replace("edge = [3, 1]", "edge = [3, 0]");
        assert!(matches!(
            ScenarioConfig::from_toml_str(&stray_burn),
            Err(ScenarioError::UnknownBurnEdge { tick: 1, .. })
        ));

        let loop_edge = SCENARIO.replace("between = [1, 3]", "between = [3, 3]");
        assert!(matches!(
            ScenarioConfig::from_toml_str(&loop_edge),
            Err(ScenarioError::Graph(GraphError::SelfLoop(_)))
        ));

        assert!(matches!(
            ScenarioConfig::from_toml_str("vertices = ["),
            Err(ScenarioError::Parse(_))
        ));
    }
}
