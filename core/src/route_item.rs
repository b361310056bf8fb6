//! Validated multi-room rescue route produced by the item generator.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::VertexId;

/// Violations detected while assembling a [`RouteItem`].
#[derive(Clone, Debug, PartialEq, Error)]
pub enum RouteItemError {
    /// The item rescues nobody.
    #[error("route item rescues nobody")]
    Empty,
    /// The vector stores an explicit zero entry.
    #[error("vector entry for room {0} is zero")]
    ZeroEntry(u32),
    /// The vector asks for more people than one agent can carry.
    #[error("vector total {total} exceeds capacity {capacity}")]
    OverCapacity {
        /// Total people requested by the vector.
        total: u32,
        /// Capacity of the agent the item was generated for.
        capacity: u32,
    },
    /// The visiting order does not list exactly the vector rooms once each.
    #[error("visiting order does not match the vector rooms")]
    OrderMismatch,
    /// The path does not start at the entry exit or end at the drop exit.
    #[error("path does not run from the entry exit to the drop exit")]
    PathEndpoints,
    /// The path does not pass the visiting order rooms in sequence.
    #[error("path skips room {0} of the visiting order")]
    PathSkipsRoom(u32),
    /// Time or value is negative or not finite.
    #[error("route item carries a non-finite or negative score")]
    InvalidScore,
}

/// Raw fields used to assemble a [`RouteItem`].
#[derive(Clone, Debug, PartialEq)]
pub struct RouteItemParts {
    /// People to rescue per room; zero entries are not allowed.
    pub vector: BTreeMap<VertexId, u32>,
    /// Order in which the vector rooms are visited.
    pub visiting_order: Vec<VertexId>,
    /// Exit the agent starts the trip from.
    pub entry_exit: VertexId,
    /// Exit the agent drops the rescued people at.
    pub drop_exit: VertexId,
    /// Complete vertex sequence from the entry exit to the drop exit.
    pub path: Vec<VertexId>,
    /// Total travel time including the carrying penalty.
    pub time: f64,
    /// Value density after the under-capacity penalty.
    pub value: f64,
    /// Multiplier applied to the raw value for the capacity shortfall.
    pub penalty_factor: f64,
}

/// Immutable, scored candidate rescue trip.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteItem {
    vector: BTreeMap<VertexId, u32>,
    visiting_order: Vec<VertexId>,
    entry_exit: VertexId,
    drop_exit: VertexId,
    path: Vec<VertexId>,
    time: f64,
    value: f64,
    penalty_factor: f64,
    people: u32,
}

impl RouteItem {
    /// Validates the parts against the agent capacity and builds the item.
    pub fn new(parts: RouteItemParts, capacity: u32) -> Result<Self, RouteItemError> {
        let RouteItemParts {
            vector,
            visiting_order,
            entry_exit,
            drop_exit,
            path,
            time,
            value,
            penalty_factor,
        } = parts;

        if let Some((room, _)) = vector.iter().find(|(_, count)| **count == 0) {
            return Err(RouteItemError::ZeroEntry(room.get()));
        }
        let people: u32 = vector.values().sum();
        if people == 0 {
            return Err(RouteItemError::Empty);
        }
        if people > capacity {
            return Err(RouteItemError::OverCapacity {
                total: people,
                capacity,
            });
        }

        let ordered: BTreeSet<VertexId> = visiting_order.iter().copied().collect();
        if ordered.len() != visiting_order.len() || !ordered.iter().eq(vector.keys()) {
            return Err(RouteItemError::OrderMismatch);
        }

        if path.first() != Some(&entry_exit) || path.last() != Some(&drop_exit) {
            return Err(RouteItemError::PathEndpoints);
        }
        let mut remaining = path.iter();
        for room in &visiting_order {
            if !remaining.any(|vertex| vertex == room) {
                return Err(RouteItemError::PathSkipsRoom(room.get()));
            }
        }

        let scores_valid = [time, value, penalty_factor]
            .iter()
            .all(|score| score.is_finite() && *score >= 0.0);
        if !scores_valid {
            return Err(RouteItemError::InvalidScore);
        }

        Ok(Self {
            vector,
            visiting_order,
            entry_exit,
            drop_exit,
            path,
            time,
            value,
            penalty_factor,
            people,
        })
    }

    /// People to rescue per room.
    #[must_use]
    pub fn vector(&self) -> &BTreeMap<VertexId, u32> {
        &self.vector
    }

    /// People this item rescues from `room`.
    #[must_use]
    pub fn count_for(&self, room: VertexId) -> u32 {
        self.vector.get(&room).copied().unwrap_or(0)
    }

    /// Rooms in visiting order.
    #[must_use]
    pub fn visiting_order(&self) -> &[VertexId] {
        &self.visiting_order
    }

    /// Exit the trip starts from.
    #[must_use]
    pub const fn entry_exit(&self) -> VertexId {
        self.entry_exit
    }

    /// Exit the rescued people are dropped at.
    #[must_use]
    pub const fn drop_exit(&self) -> VertexId {
        self.drop_exit
    }

    /// Complete vertex sequence from entry exit to drop exit.
    #[must_use]
    pub fn path(&self) -> &[VertexId] {
        &self.path
    }

    /// Total travel time of the trip.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Value density used for ranking.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Capacity shortfall multiplier already folded into [`RouteItem::value`].
    #[must_use]
    pub const fn penalty_factor(&self) -> f64 {
        self.penalty_factor
    }

    /// Total people rescued by the trip.
    #[must_use]
    pub const fn people(&self) -> u32 {
        self.people
    }

    /// Number of distinct rooms visited.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.visiting_order.len()
    }
}
