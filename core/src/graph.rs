//! Immutable building graph snapshot shared by every planning system.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::VertexId;

/// Classifies the role a vertex plays inside the building.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexKind {
    /// Enclosed space that may hold occupants and must be swept.
    Room,
    /// Connecting space that agents traverse but never sweep.
    Corridor,
    /// Building exit where rescued occupants are dropped off.
    Exit,
}

/// Single vertex of the building graph.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vertex {
    id: VertexId,
    kind: VertexKind,
    priority: f64,
    capacity: u32,
}

impl Vertex {
    /// Creates a vertex with unit priority and no declared capacity.
    #[must_use]
    pub const fn new(id: VertexId, kind: VertexKind) -> Self {
        Self {
            id,
            kind,
            priority: 1.0,
            capacity: 0,
        }
    }

    /// Returns a copy of the vertex carrying the provided rescue priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Returns a copy of the vertex carrying the provided occupant capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Identifier of the vertex.
    #[must_use]
    pub const fn id(&self) -> VertexId {
        self.id
    }

    /// Role of the vertex inside the building.
    #[must_use]
    pub const fn kind(&self) -> VertexKind {
        self.kind
    }

    /// Rescue priority weight applied to occupants found in this vertex.
    #[must_use]
    pub const fn priority(&self) -> f64 {
        self.priority
    }

    /// Declared occupant capacity (floor area proxy).
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reports whether the vertex is a room.
    #[must_use]
    pub fn is_room(&self) -> bool {
        self.kind == VertexKind::Room
    }

    /// Reports whether the vertex is an exit.
    #[must_use]
    pub fn is_exit(&self) -> bool {
        self.kind == VertexKind::Exit
    }
}

/// Unordered endpoint pair identifying an edge.
///
/// The smaller identifier is always stored first so `(a, b)` and `(b, a)`
/// compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    low: VertexId,
    high: VertexId,
}

impl EdgeKey {
    /// Creates a normalised key for the edge joining `a` and `b`.
    #[must_use]
    pub fn new(a: VertexId, b: VertexId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Endpoint with the smaller identifier.
    #[must_use]
    pub const fn low(&self) -> VertexId {
        self.low
    }

    /// Endpoint with the larger identifier.
    #[must_use]
    pub const fn high(&self) -> VertexId {
        self.high
    }

    /// Returns the endpoint opposite to `vertex`, if `vertex` touches the edge.
    #[must_use]
    pub fn other(&self, vertex: VertexId) -> Option<VertexId> {
        if vertex == self.low {
            Some(self.high)
        } else if vertex == self.high {
            Some(self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.low.get(), self.high.get())
    }
}

/// Undirected passage between two vertices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    key: EdgeKey,
    exists: bool,
    width: f32,
    length: f64,
}

impl Edge {
    /// Creates an intact edge of unit width and unit length.
    #[must_use]
    pub fn new(a: VertexId, b: VertexId) -> Self {
        Self {
            key: EdgeKey::new(a, b),
            exists: true,
            width: 1.0,
            length: 1.0,
        }
    }

    /// Returns a copy of the edge with the provided passage width.
    #[must_use]
    pub const fn with_width(mut self, width: f32) -> Self {
        self.width = width;
        self
    }

    /// Returns a copy of the edge with the provided traversal length.
    #[must_use]
    pub const fn with_length(mut self, length: f64) -> Self {
        self.length = length;
        self
    }

    /// Normalised endpoint pair of the edge.
    #[must_use]
    pub const fn key(&self) -> EdgeKey {
        self.key
    }

    /// Reports whether the edge can still be traversed.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.exists
    }

    /// Passage width of the edge.
    #[must_use]
    pub const fn width(&self) -> f32 {
        self.width
    }

    /// Unloaded traversal cost of the edge.
    #[must_use]
    pub const fn length(&self) -> f64 {
        self.length
    }
}

/// Reasons a graph description is rejected at construction time.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum GraphError {
    /// The graph does not contain a single exit vertex.
    #[error("graph contains no exit vertex")]
    NoExits,
    /// Two vertices share the same identifier.
    #[error("vertex {0} is declared more than once")]
    DuplicateVertex(u32),
    /// An edge references a vertex that was never declared.
    #[error("edge {edge} references unknown vertex {vertex}")]
    UnknownEndpoint {
        /// Offending edge.
        edge: EdgeKey,
        /// Identifier that could not be resolved.
        vertex: u32,
    },
    /// An edge connects a vertex to itself.
    #[error("edge {0} connects a vertex to itself")]
    SelfLoop(EdgeKey),
    /// An edge carries a negative or non-finite length.
    #[error("edge {0} has an invalid length")]
    InvalidLength(EdgeKey),
}

/// Immutable snapshot of the building graph for a single tick.
#[derive(Clone, Debug, PartialEq)]
pub struct Graph {
    vertices: BTreeMap<VertexId, Vertex>,
    edges: Vec<Edge>,
    adjacency: BTreeMap<VertexId, Vec<(VertexId, usize)>>,
}

impl Graph {
    /// Validates and assembles a graph from vertex and edge lists.
    pub fn new(vertices: Vec<Vertex>, edges: Vec<Edge>) -> Result<Self, GraphError> {
        let mut by_id = BTreeMap::new();
        for vertex in vertices {
            if by_id.insert(vertex.id(), vertex).is_some() {
                return Err(GraphError::DuplicateVertex(vertex.id().get()));
            }
        }

        if !by_id.values().any(Vertex::is_exit) {
            return Err(GraphError::NoExits);
        }

        let mut adjacency: BTreeMap<VertexId, Vec<(VertexId, usize)>> =
            by_id.keys().map(|id| (*id, Vec::new())).collect();
        for (index, edge) in edges.iter().enumerate() {
            let key = edge.key();
            if key.low() == key.high() {
                return Err(GraphError::SelfLoop(key));
            }
            if !edge.length().is_finite() || edge.length() < 0.0 {
                return Err(GraphError::InvalidLength(key));
            }
            for endpoint in [key.low(), key.high()] {
                if !by_id.contains_key(&endpoint) {
                    return Err(GraphError::UnknownEndpoint {
                        edge: key,
                        vertex: endpoint.get(),
                    });
                }
            }
            if let Some(list) = adjacency.get_mut(&key.low()) {
                list.push((key.high(), index));
            }
            if let Some(list) = adjacency.get_mut(&key.high()) {
                list.push((key.low(), index));
            }
        }

        Ok(Self {
            vertices: by_id,
            edges,
            adjacency,
        })
    }

    /// Looks up a vertex by identifier.
    #[must_use]
    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    /// Reports whether the graph declares the provided vertex.
    #[must_use]
    pub fn contains(&self, id: VertexId) -> bool {
        self.vertices.contains_key(&id)
    }

    /// Iterates all vertices in identifier order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    /// Iterates room identifiers in ascending order.
    pub fn rooms(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertices
            .values()
            .filter(|vertex| vertex.is_room())
            .map(Vertex::id)
    }

    /// Iterates exit identifiers in ascending order.
    pub fn exits(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertices
            .values()
            .filter(|vertex| vertex.is_exit())
            .map(Vertex::id)
    }

    /// All declared edges, burned or not.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Neighbours reachable from `id` over intact edges together with the
    /// unloaded edge length.
    pub fn traversable_neighbors(
        &self,
        id: VertexId,
    ) -> impl Iterator<Item = (VertexId, f64)> + '_ {
        self.adjacency
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(move |(neighbor, index)| {
                let edge = self.edges.get(*index)?;
                edge.exists().then_some((*neighbor, edge.length()))
            })
    }

    /// Reports whether an intact edge joins `a` and `b`.
    #[must_use]
    pub fn is_traversable(&self, a: VertexId, b: VertexId) -> bool {
        self.traversable_neighbors(a)
            .any(|(neighbor, _)| neighbor == b)
    }

    /// Reports whether any edge, intact or burned, joins `a` and `b`.
    #[must_use]
    pub fn is_adjacent(&self, a: VertexId, b: VertexId) -> bool {
        self.adjacency
            .get(&a)
            .is_some_and(|list| list.iter().any(|(neighbor, _)| *neighbor == b))
    }

    /// Marks every edge joining the key's endpoints as impassable.
    ///
    /// Returns `true` when at least one intact edge was burned.
    pub fn burn(&mut self, key: EdgeKey) -> bool {
        let mut burned = false;
        for edge in &mut self.edges {
            if edge.key == key && edge.exists {
                edge.exists = false;
                burned = true;
            }
        }
        burned
    }

    /// Set of edge keys that can no longer be traversed.
    #[must_use]
    pub fn burned_edges(&self) -> BTreeSet<EdgeKey> {
        self.edges
            .iter()
            .filter(|edge| !edge.exists())
            .map(Edge::key)
            .collect()
    }

    /// Structural digest of the burned-edge set used for change detection.
    #[must_use]
    pub fn burn_digest(&self) -> BurnDigest {
        BurnDigest::of(&self.burned_edges())
    }
}

/// SHA-256 digest of a burned-edge set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BurnDigest([u8; 32]);

impl BurnDigest {
    /// Hashes the provided burned-edge set in key order.
    #[must_use]
    pub fn of(burned: &BTreeSet<EdgeKey>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"burned-edges");
        hasher.update((burned.len() as u64).to_le_bytes());
        for key in burned {
            hasher.update(key.low().get().to_le_bytes());
            hasher.update(key.high().get().to_le_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BurnDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
