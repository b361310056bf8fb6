//! Partitioning and traversal helpers for the exploration sweep.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, BinaryHeap},
};

use fire_rescue_core::VertexId;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Cost charged between rooms that cannot reach each other.
const DISCONNECTED_COST: f64 = 1.0e9;

/// Undirected adjacency of a spanning forest.
pub(crate) type Forest = BTreeMap<VertexId, BTreeSet<VertexId>>;

/// Medoid and members of one partition.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Partition {
    pub(crate) medoid: VertexId,
    pub(crate) members: Vec<VertexId>,
}

/// Balanced K-medoids over `rooms`.
///
/// Initial medoids are drawn with `rng`; every iteration assigns rooms to
/// medoids in ascending cost order while no partition exceeds
/// `ceil(rooms / k)` members, then moves each medoid to the member with the
/// lowest summed cost to the rest of its partition.
pub(crate) fn k_medoids<F>(
    rooms: &[VertexId],
    k: usize,
    cost: F,
    rng: &mut ChaCha8Rng,
    max_iterations: usize,
) -> Vec<Partition>
where
    F: Fn(VertexId, VertexId) -> Option<f64>,
{
    if k == 0 || rooms.is_empty() {
        return Vec::new();
    }
    let k = k.min(rooms.len());
    let price = |a: VertexId, b: VertexId| cost(a, b).unwrap_or(DISCONNECTED_COST);

    let mut medoids: Vec<VertexId> = rooms.choose_multiple(rng, k).copied().collect();
    medoids.sort();
    let limit = rooms.len().div_ceil(k);
    let mut members = assign_balanced(rooms, &medoids, limit, &price);

    for _ in 0..max_iterations {
        let updated: Vec<VertexId> = members
            .iter()
            .zip(&medoids)
            .map(|(group, current)| best_medoid(group, &price).unwrap_or(*current))
            .collect();
        if updated == medoids {
            break;
        }
        medoids = updated;
        members = assign_balanced(rooms, &medoids, limit, &price);
    }

    medoids
        .into_iter()
        .zip(members)
        .map(|(medoid, members)| Partition { medoid, members })
        .collect()
}

fn assign_balanced<F>(
    rooms: &[VertexId],
    medoids: &[VertexId],
    limit: usize,
    price: &F,
) -> Vec<Vec<VertexId>>
where
    F: Fn(VertexId, VertexId) -> f64,
{
    let mut groups: Vec<Vec<VertexId>> = medoids.iter().map(|medoid| vec![*medoid]).collect();
    let mut placed: BTreeSet<VertexId> = medoids.iter().copied().collect();

    let mut pairs: Vec<(f64, VertexId, usize)> = rooms
        .iter()
        .filter(|room| !placed.contains(room))
        .flat_map(|room| {
            medoids
                .iter()
                .enumerate()
                .map(move |(index, medoid)| (price(*medoid, *room), *room, index))
        })
        .collect();
    pairs.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    for (_, room, index) in pairs {
        if placed.contains(&room) || groups[index].len() >= limit {
            continue;
        }
        groups[index].push(room);
        let _ = placed.insert(room);
    }
    for group in &mut groups {
        group.sort();
    }
    groups
}

fn best_medoid<F>(group: &[VertexId], price: &F) -> Option<VertexId>
where
    F: Fn(VertexId, VertexId) -> f64,
{
    group
        .iter()
        .map(|candidate| {
            let total: f64 = group.iter().map(|other| price(*candidate, *other)).sum();
            (total, *candidate)
        })
        .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, medoid)| medoid)
}

/// Candidate edge on the Prim frontier, ordered so the heap pops the cheapest.
#[derive(Clone, Copy, Debug)]
struct Reach {
    cost: f64,
    from: VertexId,
    to: VertexId,
}

impl PartialEq for Reach {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Reach {}

impl PartialOrd for Reach {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reach {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.to.cmp(&self.to))
            .then_with(|| other.from.cmp(&self.from))
    }
}

/// Prim's minimum spanning forest over the complete graph of `rooms`.
///
/// Pairs without a cost are not connected; each component that Prim cannot
/// reach starts a fresh tree so every room appears in the forest.
pub(crate) fn spanning_forest<F>(rooms: &[VertexId], cost: F) -> Forest
where
    F: Fn(VertexId, VertexId) -> Option<f64>,
{
    let mut forest: Forest = rooms.iter().map(|room| (*room, BTreeSet::new())).collect();
    let mut joined: BTreeSet<VertexId> = BTreeSet::new();

    let push_edges = |from: VertexId, joined: &BTreeSet<VertexId>, heap: &mut BinaryHeap<Reach>| {
        for to in rooms {
            if joined.contains(to) {
                continue;
            }
            if let Some(cost) = cost(from, *to) {
                heap.push(Reach {
                    cost,
                    from,
                    to: *to,
                });
            }
        }
    };

    for root in rooms {
        if joined.contains(root) {
            continue;
        }
        let _ = joined.insert(*root);
        let mut heap = BinaryHeap::new();
        push_edges(*root, &joined, &mut heap);

        while let Some(Reach { from, to, .. }) = heap.pop() {
            if !joined.insert(to) {
                continue;
            }
            if let Some(neighbors) = forest.get_mut(&from) {
                let _ = neighbors.insert(to);
            }
            if let Some(neighbors) = forest.get_mut(&to) {
                let _ = neighbors.insert(from);
            }
            push_edges(to, &joined, &mut heap);
        }
    }
    forest
}

/// Depth-first pre-order over the forest starting at `start`.
///
/// Children are explored nearest first. Once a tree is exhausted the walk
/// continues from the unvisited room closest to the last room emitted.
pub(crate) fn preorder<F>(forest: &Forest, start: VertexId, cost: F) -> Vec<VertexId>
where
    F: Fn(VertexId, VertexId) -> Option<f64>,
{
    let price = |a: VertexId, b: VertexId| cost(a, b).unwrap_or(DISCONNECTED_COST);
    let mut order = Vec::with_capacity(forest.len());
    let mut seen: BTreeSet<VertexId> = BTreeSet::new();
    let mut root = forest.contains_key(&start).then_some(start);

    while let Some(tree_root) = root {
        let mut stack = vec![tree_root];
        while let Some(room) = stack.pop() {
            if !seen.insert(room) {
                continue;
            }
            order.push(room);
            let mut children: Vec<VertexId> = forest
                .get(&room)
                .into_iter()
                .flatten()
                .copied()
                .filter(|child| !seen.contains(child))
                .collect();
            children.sort_by(|a, b| {
                price(room, *b)
                    .total_cmp(&price(room, *a))
                    .then_with(|| b.cmp(a))
            });
            stack.extend(children);
        }

        let last = order.last().copied().unwrap_or(tree_root);
        root = forest
            .keys()
            .copied()
            .filter(|room| !seen.contains(room))
            .min_by(|a, b| {
                price(last, *a)
                    .total_cmp(&price(last, *b))
                    .then_with(|| a.cmp(b))
            });
    }
    order
}
