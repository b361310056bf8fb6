#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Distance oracle answering shortest-path queries over a graph snapshot.
//!
//! Weighted queries run Dijkstra over intact edges and scale every traversal
//! by a load multiplier, so the same table can describe an empty-handed agent
//! (`1.0`) or an agent carrying occupants. Live movement uses [`next_hop`],
//! an unweighted breadth-first search that only returns the first step and is
//! therefore cheap enough to re-run every tick as edges burn.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BinaryHeap, VecDeque},
};

use fire_rescue_core::{Graph, VertexId};

/// Load multiplier of an agent that carries nobody.
pub const UNLOADED: f64 = 1.0;

/// Shortest known route from a source to one vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct PathEntry {
    /// Accumulated cost including the load multiplier.
    pub distance: f64,
    /// Vertex sequence from the source to the destination, both inclusive.
    pub path: Vec<VertexId>,
}

/// Shortest routes from one source to every reachable vertex.
pub type ShortestPaths = BTreeMap<VertexId, PathEntry>;

/// Runs Dijkstra from `start`, skipping burned edges.
///
/// Every edge costs its length multiplied by `load`. The start vertex maps to
/// a zero distance with a single-vertex path. Unreachable vertices are
/// omitted, as is everything when `start` is not part of the graph.
#[must_use]
pub fn single_source(graph: &Graph, start: VertexId, load: f64) -> ShortestPaths {
    let mut result = ShortestPaths::new();
    if !graph.contains(start) {
        return result;
    }

    let mut best: BTreeMap<VertexId, f64> = BTreeMap::new();
    let mut parent: BTreeMap<VertexId, VertexId> = BTreeMap::new();
    let mut settled: BTreeMap<VertexId, f64> = BTreeMap::new();
    let mut frontier = BinaryHeap::new();

    let _ = best.insert(start, 0.0);
    frontier.push(Frontier {
        distance: 0.0,
        vertex: start,
    });

    while let Some(Frontier { distance, vertex }) = frontier.pop() {
        if settled.contains_key(&vertex) {
            continue;
        }
        let _ = settled.insert(vertex, distance);

        for (neighbor, length) in graph.traversable_neighbors(vertex) {
            if settled.contains_key(&neighbor) {
                continue;
            }
            let candidate = distance + length * load;
            let improves = best
                .get(&neighbor)
                .map_or(true, |current| candidate < *current);
            if improves {
                let _ = best.insert(neighbor, candidate);
                let _ = parent.insert(neighbor, vertex);
                frontier.push(Frontier {
                    distance: candidate,
                    vertex: neighbor,
                });
            }
        }
    }

    for (vertex, distance) in settled {
        let path = trace_path(&parent, start, vertex);
        let _ = result.insert(vertex, PathEntry { distance, path });
    }
    result
}

/// Runs [`single_source`] from every vertex in `sources`.
#[must_use]
pub fn all_pairs<I>(graph: &Graph, sources: I, load: f64) -> DistanceTable
where
    I: IntoIterator<Item = VertexId>,
{
    let rows = sources
        .into_iter()
        .map(|source| (source, single_source(graph, source, load)))
        .collect();
    DistanceTable { load, rows }
}

/// Shortest-path results for a restricted set of sources.
///
/// Because the graph is undirected, a query succeeds whenever either
/// endpoint is a source; paths are reversed when answered from the far end.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DistanceTable {
    load: f64,
    rows: BTreeMap<VertexId, ShortestPaths>,
}

impl DistanceTable {
    /// Load multiplier the table was computed with.
    #[must_use]
    pub fn load(&self) -> f64 {
        self.load
    }

    /// Sources the table holds rows for.
    pub fn sources(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.rows.keys().copied()
    }

    /// Shortest distance between `from` and `to`, if either is a source and
    /// the pair is connected.
    #[must_use]
    pub fn distance(&self, from: VertexId, to: VertexId) -> Option<f64> {
        self.entry(from, to).map(|(entry, _)| entry.distance)
    }

    /// Shortest vertex sequence from `from` to `to`.
    #[must_use]
    pub fn path(&self, from: VertexId, to: VertexId) -> Option<Vec<VertexId>> {
        self.entry(from, to).map(|(entry, reversed)| {
            let mut path = entry.path.clone();
            if reversed {
                path.reverse();
            }
            path
        })
    }

    /// Reports whether `to` is reachable from `from`.
    #[must_use]
    pub fn is_reachable(&self, from: VertexId, to: VertexId) -> bool {
        self.entry(from, to).is_some()
    }

    fn entry(&self, from: VertexId, to: VertexId) -> Option<(&PathEntry, bool)> {
        if let Some(entry) = self.rows.get(&from).and_then(|row| row.get(&to)) {
            return Some((entry, false));
        }
        self.rows
            .get(&to)
            .and_then(|row| row.get(&from))
            .map(|entry| (entry, true))
    }
}

/// First step of an unweighted shortest route from `from` to `goal`.
///
/// Returns `None` when `from == goal` or the goal cannot be reached over
/// intact edges.
#[must_use]
pub fn next_hop(graph: &Graph, from: VertexId, goal: VertexId) -> Option<VertexId> {
    if from == goal || !graph.contains(from) || !graph.contains(goal) {
        return None;
    }

    let mut first_step: BTreeMap<VertexId, VertexId> = BTreeMap::new();
    let mut queue = VecDeque::new();
    let _ = first_step.insert(from, from);
    queue.push_back(from);

    while let Some(vertex) = queue.pop_front() {
        let origin = first_step.get(&vertex).copied().unwrap_or(vertex);
        for (neighbor, _) in graph.traversable_neighbors(vertex) {
            if first_step.contains_key(&neighbor) {
                continue;
            }
            let step = if vertex == from { neighbor } else { origin };
            if neighbor == goal {
                return Some(step);
            }
            let _ = first_step.insert(neighbor, step);
            queue.push_back(neighbor);
        }
    }

    None
}

/// Hop counts from `start` to every vertex reachable over intact edges.
#[must_use]
pub fn hop_distances(graph: &Graph, start: VertexId) -> BTreeMap<VertexId, u32> {
    let mut hops = BTreeMap::new();
    if !graph.contains(start) {
        return hops;
    }

    let mut queue = VecDeque::new();
    let _ = hops.insert(start, 0);
    queue.push_back(start);
    while let Some(vertex) = queue.pop_front() {
        let next = hops.get(&vertex).copied().unwrap_or(0).saturating_add(1);
        for (neighbor, _) in graph.traversable_neighbors(vertex) {
            if hops.contains_key(&neighbor) {
                continue;
            }
            let _ = hops.insert(neighbor, next);
            queue.push_back(neighbor);
        }
    }
    hops
}

/// Closest vertex to `from` (by hop count) among those accepted by
/// `is_candidate`; ties resolve to the lowest identifier.
#[must_use]
pub fn nearest<F>(graph: &Graph, from: VertexId, mut is_candidate: F) -> Option<VertexId>
where
    F: FnMut(VertexId) -> bool,
{
    hop_distances(graph, from)
        .into_iter()
        .filter(|(vertex, _)| is_candidate(*vertex))
        .min_by_key(|(vertex, hops)| (*hops, *vertex))
        .map(|(vertex, _)| vertex)
}

/// Exits reachable from `from` over intact edges, closest first.
#[must_use]
pub fn reachable_exits(graph: &Graph, from: VertexId) -> Vec<VertexId> {
    let hops = hop_distances(graph, from);
    let mut exits: Vec<(u32, VertexId)> = graph
        .exits()
        .filter_map(|exit| hops.get(&exit).map(|count| (*count, exit)))
        .collect();
    exits.sort();
    exits.into_iter().map(|(_, exit)| exit).collect()
}

fn trace_path(
    parent: &BTreeMap<VertexId, VertexId>,
    start: VertexId,
    end: VertexId,
) -> Vec<VertexId> {
    let mut path = vec![end];
    let mut current = end;
    while current != start {
        match parent.get(&current) {
            Some(previous) => {
                current = *previous;
                path.push(current);
            }
            None => break,
        }
    }
    path.reverse();
    path
}

#[derive(Clone, Copy, Debug)]
struct Frontier {
    distance: f64,
    vertex: VertexId,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    // Reversed so the max-heap pops the closest vertex, lowest id first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}
