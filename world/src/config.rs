//! Scenario description parsed from TOML.

use std::collections::BTreeSet;

use fire_rescue_core::{Edge, EdgeKey, Graph, GraphError, Vertex, VertexId, VertexKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a scenario is rejected before the world is built.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The TOML text could not be parsed.
    #[error("failed to parse scenario: {0}")]
    Parse(#[from] toml::de::Error),
    /// The building graph is malformed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The scenario declares no agents.
    #[error("scenario declares no agents")]
    NoAgents,
    /// An agent starts on a vertex the graph does not declare.
    #[error("agent {agent} starts on unknown vertex {vertex}")]
    UnknownStart {
        /// Position of the agent in the scenario list.
        agent: usize,
        /// Unresolved vertex identifier.
        vertex: u32,
    },
    /// An agent has no carrying capacity.
    #[error("agent {0} has zero capacity")]
    ZeroCapacity(usize),
    /// Occupants are declared for a vertex the graph does not know.
    #[error("occupants declared for unknown vertex {0}")]
    UnknownOccupantVertex(u32),
    /// An occupant range has its lower bound above its upper bound.
    #[error("{kind} occupant range at vertex {vertex} is inverted")]
    InvertedRange {
        /// Vertex the range belongs to.
        vertex: u32,
        /// Which occupant class the range describes.
        kind: &'static str,
    },
    /// The fire origin is not a declared vertex.
    #[error("fire origin {0} is not a declared vertex")]
    UnknownFireOrigin(u32),
    /// A scheduled burn names an edge the graph does not declare.
    #[error("burn at tick {tick} targets unknown edge {edge}")]
    UnknownBurnEdge {
        /// Tick the burn was scheduled for.
        tick: u64,
        /// Edge that could not be found.
        edge: EdgeKey,
    },
}

/// Complete scenario: building, occupants, agents and burn schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Human readable scenario name.
    #[serde(default)]
    pub name: Option<String>,
    /// Declared vertices.
    pub vertices: Vec<VertexConfig>,
    /// Declared edges.
    pub edges: Vec<EdgeConfig>,
    /// Vertex the fire starts from, used for proximity weighting.
    #[serde(default)]
    pub fire_origin: Option<u32>,
    /// Occupant ranges per vertex; undeclared vertices start empty.
    #[serde(default)]
    pub occupants: Vec<OccupantRange>,
    /// Rescue agents.
    pub agents: Vec<AgentConfig>,
    /// Edges that burn at the end of the given ticks.
    #[serde(default)]
    pub burns: Vec<BurnEvent>,
}

/// Vertex declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VertexConfig {
    /// Unique identifier.
    pub id: u32,
    /// Role of the vertex.
    pub kind: VertexKind,
    /// Rescue priority of the occupants found here.
    #[serde(default = "unit")]
    pub priority: f64,
    /// Declared occupant capacity.
    #[serde(default)]
    pub capacity: u32,
}

/// Edge declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Endpoint identifiers.
    pub between: [u32; 2],
    /// Passage width.
    #[serde(default = "unit_width")]
    pub width: f32,
    /// Traversal length.
    #[serde(default = "unit")]
    pub length: f64,
}

/// Inclusive occupant ranges sampled once when the world is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupantRange {
    /// Vertex the occupants start at.
    pub vertex: u32,
    /// Inclusive range of self-capable occupants.
    #[serde(default)]
    pub capable: [u32; 2],
    /// Inclusive range of incapacitated occupants.
    #[serde(default)]
    pub incapable: [u32; 2],
}

/// Rescue agent declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Starting vertex.
    pub start: u32,
    /// People the agent can carry at once.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

/// Scheduled loss of an edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnEvent {
    /// Tick at whose end the edge burns.
    pub tick: u64,
    /// Endpoints of the burning edge.
    pub edge: [u32; 2],
}

impl BurnEvent {
    /// Normalised key of the burning edge.
    #[must_use]
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(VertexId::new(self.edge[0]), VertexId::new(self.edge[1]))
    }
}

fn unit() -> f64 {
    1.0
}

fn unit_width() -> f32 {
    1.0
}

fn default_capacity() -> u32 {
    3
}

impl ScenarioConfig {
    /// Parses a scenario from TOML text and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self, ScenarioError> {
        let config: Self = toml::from_str(text)?;
        let _ = config.build_graph()?;
        Ok(config)
    }

    /// Builds the building graph and checks every cross reference.
    pub fn build_graph(&self) -> Result<Graph, ScenarioError> {
        let vertices = self
            .vertices
            .iter()
            .map(|vertex| {
                Vertex::new(VertexId::new(vertex.id), vertex.kind)
                    .with_priority(vertex.priority)
                    .with_capacity(vertex.capacity)
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .map(|edge| {
                let [from, to] = edge.between;
                Edge::new(VertexId::new(from), VertexId::new(to))
                    .with_width(edge.width)
                    .with_length(edge.length)
            })
            .collect();
        let graph = Graph::new(vertices, edges)?;

        if self.agents.is_empty() {
            return Err(ScenarioError::NoAgents);
        }
        for (index, agent) in self.agents.iter().enumerate() {
            if !graph.contains(VertexId::new(agent.start)) {
                return Err(ScenarioError::UnknownStart {
                    agent: index,
                    vertex: agent.start,
                });
            }
            if agent.capacity == 0 {
                return Err(ScenarioError::ZeroCapacity(index));
            }
        }

        for range in &self.occupants {
            if !graph.contains(VertexId::new(range.vertex)) {
                return Err(ScenarioError::UnknownOccupantVertex(range.vertex));
            }
            let ranges = [("capable", range.capable), ("incapable", range.incapable)];
            for (kind, [low, high]) in ranges {
                if low > high {
                    return Err(ScenarioError::InvertedRange {
                        vertex: range.vertex,
                        kind,
                    });
                }
            }
        }

        if let Some(origin) = self.fire_origin {
            if !graph.contains(VertexId::new(origin)) {
                return Err(ScenarioError::UnknownFireOrigin(origin));
            }
        }

        let declared: BTreeSet<EdgeKey> = graph.edges().iter().map(Edge::key).collect();
        for burn in &self.burns {
            let key = burn.key();
            if !declared.contains(&key) {
                return Err(ScenarioError::UnknownBurnEdge {
                    tick: burn.tick,
                    edge: key,
                });
            }
        }
        Ok(graph)
    }
}
