#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the fire rescue planner.
//!
//! This crate defines the message surface that connects the environment, the
//! planning systems and the adapters. Environments expose an immutable
//! [`StateSnapshot`] every tick through [`Environment::read`], systems respond
//! exclusively with per-agent [`Action`] batches, and the environment reports
//! what happened to each action through [`ActionOutcome`] values.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

mod graph;
mod route_item;

pub use graph::{BurnDigest, Edge, EdgeKey, Graph, GraphError, Vertex, VertexKind};
pub use route_item::{RouteItem, RouteItemError, RouteItemParts};

/// Unique identifier assigned to a vertex of the building graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(u32);

impl VertexId {
    /// Creates a new vertex identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Unique identifier assigned to a rescue agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(u32);

impl AgentId {
    /// Creates a new agent identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Atomic actions an agent may attempt during a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Step to an adjacent vertex over an intact edge.
    Move {
        /// Vertex the agent attempts to enter.
        target: VertexId,
    },
    /// Direct every self-capable occupant at the agent's vertex to evacuate.
    Instruct,
    /// Pick up incapacitated occupants at the agent's vertex.
    PickUp {
        /// Number of occupants to lift.
        count: u32,
    },
    /// Drop every carried occupant at the agent's exit.
    DropOff,
}

/// Per-agent action batches submitted to the environment for one tick.
pub type AgentActions = BTreeMap<AgentId, Vec<Action>>;

/// Maximum number of atomic actions a single agent may take per tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct ActionBudget(u32);

impl ActionBudget {
    /// Budget used when none is configured.
    pub const DEFAULT: Self = Self(2);

    /// Creates a budget allowing `limit` actions, never less than one.
    #[must_use]
    pub const fn new(limit: u32) -> Self {
        if limit == 0 {
            Self(1)
        } else {
            Self(limit)
        }
    }

    /// Number of actions allowed per agent per tick.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.0 as usize
    }

    /// Drops every action beyond the budget.
    pub fn truncate(&self, actions: &mut Vec<Action>) {
        actions.truncate(self.limit());
    }
}

impl Default for ActionBudget {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for ActionBudget {
    fn from(limit: u32) -> Self {
        Self::new(limit)
    }
}

impl From<ActionBudget> for u32 {
    fn from(budget: ActionBudget) -> Self {
        budget.0
    }
}

/// Active phase of the rescue operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Agents sweep the building and instruct self-capable occupants.
    Exploration,
    /// Agents execute the optimised multi-trip carrying plan.
    OptimizedRescue,
}

/// Occupant counts observed at a visited vertex.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccupantCounts {
    /// Self-capable occupants that have not been instructed yet.
    pub capable: u32,
    /// Incapacitated occupants waiting to be carried out.
    pub incapable: u32,
    /// Self-capable occupants already instructed and on their way out.
    pub instructed: u32,
}

/// Immutable representation of a single agent used for planning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentSnapshot {
    /// Unique identifier assigned to the agent.
    pub id: AgentId,
    /// Vertex currently occupied by the agent.
    pub position: VertexId,
    /// Incapacitated occupants currently carried.
    pub carrying: u32,
    /// Maximum number of occupants the agent can carry.
    pub capacity: u32,
    /// Vertices the agent has entered so far.
    pub visited: BTreeSet<VertexId>,
}

impl AgentSnapshot {
    /// Free carrying slots left on the agent.
    #[must_use]
    pub fn free_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.carrying)
    }
}

/// Read-only snapshot of the environment handed to the planner each tick.
#[derive(Clone, Debug, PartialEq)]
pub struct StateSnapshot {
    /// Index of the tick the snapshot was captured at.
    pub tick: u64,
    /// Building graph including burned edges.
    pub graph: Graph,
    /// Agents in ascending identifier order.
    pub agents: Vec<AgentSnapshot>,
    /// Occupants discovered at visited vertices.
    pub occupants: BTreeMap<VertexId, OccupantCounts>,
}

impl StateSnapshot {
    /// Looks up an agent by identifier.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&AgentSnapshot> {
        self.agents.iter().find(|agent| agent.id == id)
    }

    /// Union of the vertices visited by any agent.
    #[must_use]
    pub fn visited(&self) -> BTreeSet<VertexId> {
        self.agents
            .iter()
            .flat_map(|agent| agent.visited.iter().copied())
            .collect()
    }

    /// Rooms no agent has entered yet.
    #[must_use]
    pub fn unvisited_rooms(&self) -> BTreeSet<VertexId> {
        let visited = self.visited();
        self.graph
            .rooms()
            .filter(|room| !visited.contains(room))
            .collect()
    }

    /// Occupants observed at `vertex`, zero when nothing was discovered.
    #[must_use]
    pub fn occupants_at(&self, vertex: VertexId) -> OccupantCounts {
        self.occupants.get(&vertex).copied().unwrap_or_default()
    }

    /// Incapacitated occupants discovered per room, omitting empty rooms.
    #[must_use]
    pub fn incapable_by_room(&self) -> BTreeMap<VertexId, u32> {
        self.occupants
            .iter()
            .filter(|(vertex, counts)| {
                counts.incapable > 0
                    && self
                        .graph
                        .vertex(**vertex)
                        .is_some_and(|candidate| candidate.is_room())
            })
            .map(|(vertex, counts)| (*vertex, counts.incapable))
            .collect()
    }
}

/// Reasons the environment refused an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The action referenced an agent the environment does not know.
    UnknownAgent,
    /// The agent already used its action budget this tick.
    BudgetExceeded,
    /// The move target is not adjacent to the agent.
    NotAdjacent,
    /// Every edge to the move target has burned.
    EdgeBurned,
    /// There are no self-capable occupants to instruct.
    NothingToInstruct,
    /// Fewer incapacitated occupants are present than requested.
    InsufficientOccupants,
    /// The pick-up would exceed the agent's capacity.
    OverCapacity,
    /// Drop-offs are only accepted at exits.
    NotAnExit,
    /// The agent carries nobody.
    NothingCarried,
}

/// Result of applying a single action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The environment applied the action.
    Applied,
    /// The environment refused the action.
    Rejected(RejectReason),
}

/// Outcome reported by the environment for one submitted action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Agent that submitted the action.
    pub agent: AgentId,
    /// Submitted action.
    pub action: Action,
    /// Whether the action was applied.
    pub status: ActionStatus,
}

/// Outcomes of a full tick.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickResult {
    /// Index of the tick that was just completed.
    pub tick: u64,
    /// Outcome per submitted action in submission order.
    pub outcomes: Vec<ActionOutcome>,
    /// Edges that burned at the end of the tick.
    pub burned: Vec<EdgeKey>,
}

impl TickResult {
    /// Number of actions that were applied.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == ActionStatus::Applied)
            .count()
    }
}

/// Environment collaborator that owns the authoritative simulation state.
pub trait Environment {
    /// Captures the state visible to the planner.
    fn read(&self) -> StateSnapshot;

    /// Applies one tick worth of agent actions and advances the clock.
    fn apply(&mut self, actions: &AgentActions) -> TickResult;
}
