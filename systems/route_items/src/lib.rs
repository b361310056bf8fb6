#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Batch generator of scored multi-room rescue routes.
//!
//! For every combination of up to `capacity` rooms, capped by the per-trip
//! room limit, the generator finds the fastest visiting order and exit pair,
//! expands the combination into every count vector the rooms can supply,
//! scores each vector by priority-weighted people per unit of time, and
//! finally discards combined trips that are not strictly faster than running
//! their visits separately.
//! The pass is combinatorial and meant to run once per phase transition; the
//! combinations are evaluated in parallel.

use std::collections::BTreeMap;

use fire_rescue_core::{Graph, RouteItem, RouteItemParts, VertexId};
use fire_rescue_system_distance::{hop_distances, DistanceTable};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

mod combinatorics;

use combinatorics::{combinations, count_vectors, next_permutation};

/// Scoring knobs applied while generating route items.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorTuning {
    /// Cost multiplier for every segment walked after the first pick-up.
    pub carry_multiplier: f64,
    /// Value reduction per missing person; `value /= 1 + shortage * rate`.
    pub penalty_rate: f64,
    /// Floor applied to the trip time before dividing, avoids zero-time blow-ups.
    pub epsilon: f64,
    /// Extra weight for rooms close to the fire origin; zero disables the boost.
    pub fire_weight: f64,
    /// Most rooms a single trip may visit, whatever the carrying capacity.
    /// The permutation search grows factorially with it; zero acts as one.
    pub max_rooms_per_trip: u32,
}

impl Default for GeneratorTuning {
    fn default() -> Self {
        Self {
            carry_multiplier: 2.0,
            penalty_rate: 0.25,
            epsilon: 1e-6,
            fire_weight: 0.0,
            max_rooms_per_trip: 3,
        }
    }
}

/// Incapacitated occupants waiting in one room.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoomDemand {
    /// Number of incapacitated occupants still in the room.
    pub incapable: u32,
    /// Rescue priority of the room.
    pub priority: f64,
}

/// Everything a generation pass reads.
#[derive(Clone, Copy, Debug)]
pub struct GenerationInput<'a> {
    /// Rooms holding incapacitated occupants.
    pub demand: &'a BTreeMap<VertexId, RoomDemand>,
    /// Exits trips may start from or end at.
    pub exits: &'a [VertexId],
    /// Unloaded distances whose sources cover every demand room.
    pub distances: &'a DistanceTable,
    /// Hop distance from the fire origin per vertex, when known.
    pub proximity: Option<&'a BTreeMap<VertexId, u32>>,
    /// Carrying capacity of the agents the items are built for.
    pub capacity: u32,
}

/// Counters describing the work done by one generation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GenerationStats {
    /// Room combinations examined.
    pub combinations: usize,
    /// Orderings evaluated across all combinations.
    pub permutations: usize,
    /// Items scored before pruning.
    pub scored: usize,
    /// Multi-room items removed by dominance pruning.
    pub pruned: usize,
}

/// Items produced by a generation pass together with its counters.
#[derive(Clone, Debug, Default)]
pub struct Generation {
    /// Surviving items ordered by descending value density.
    pub items: Vec<RouteItem>,
    /// Work counters for the pass.
    pub stats: GenerationStats,
}

/// Stateless generator configured with scoring knobs.
#[derive(Clone, Debug, Default)]
pub struct RouteItemGenerator {
    tuning: GeneratorTuning,
}

impl RouteItemGenerator {
    /// Creates a generator using the provided tuning.
    #[must_use]
    pub fn new(tuning: GeneratorTuning) -> Self {
        Self { tuning }
    }

    /// Tuning the generator scores with.
    #[must_use]
    pub fn tuning(&self) -> &GeneratorTuning {
        &self.tuning
    }

    /// Enumerates, scores and prunes every candidate route for the input.
    #[must_use]
    pub fn generate(&self, input: &GenerationInput<'_>) -> Generation {
        let mut stats = GenerationStats::default();
        if input.capacity == 0 || input.exits.is_empty() {
            return Generation::default();
        }

        let pool: Vec<VertexId> = input
            .demand
            .iter()
            .filter(|(room, demand)| {
                demand.incapable > 0
                    && input
                        .exits
                        .iter()
                        .any(|exit| input.distances.is_reachable(*exit, **room))
            })
            .map(|(room, _)| *room)
            .collect();

        let room_limit = input.capacity.min(self.tuning.max_rooms_per_trip.max(1));
        let largest = usize::try_from(room_limit)
            .unwrap_or(usize::MAX)
            .min(pool.len());
        let combos: Vec<Vec<VertexId>> = (1..=largest)
            .flat_map(|size| combinations(&pool, size))
            .collect();
        stats.combinations = combos.len();

        let expanded: Vec<(Vec<RouteItem>, usize)> = combos
            .par_iter()
            .map(|combo| self.expand(combo, input))
            .collect();

        let mut scored = Vec::new();
        for (items, permutations) in expanded {
            stats.permutations += permutations;
            scored.extend(items);
        }
        stats.scored = scored.len();

        let mut items = prune_dominated(scored);
        stats.pruned = stats.scored - items.len();
        items.sort_by(|a, b| {
            b.value()
                .total_cmp(&a.value())
                .then_with(|| a.time().total_cmp(&b.time()))
                .then_with(|| a.vector().cmp(b.vector()))
        });

        info!(
            rooms = pool.len(),
            combinations = stats.combinations,
            scored = stats.scored,
            pruned = stats.pruned,
            kept = items.len(),
            "route items generated"
        );
        Generation { items, stats }
    }

    fn expand(&self, combo: &[VertexId], input: &GenerationInput<'_>) -> (Vec<RouteItem>, usize) {
        let (route, permutations) = self.best_route(combo, input);
        let Some(route) = route else {
            debug!(?combo, "no traversable route for combination");
            return (Vec::new(), permutations);
        };

        let available: Vec<u32> = combo
            .iter()
            .map(|room| input.demand.get(room).map_or(0, |demand| demand.incapable))
            .collect();

        let mut items = Vec::new();
        for counts in count_vectors(&available, input.capacity) {
            let vector: BTreeMap<VertexId, u32> =
                combo.iter().copied().zip(counts.iter().copied()).collect();
            let parts = RouteItemParts {
                value: 0.0,
                penalty_factor: 1.0,
                vector,
                visiting_order: route.order.clone(),
                entry_exit: route.entry,
                drop_exit: route.drop,
                path: route.path.clone(),
                time: route.time,
            };
            let parts = self.score(parts, input);
            match RouteItem::new(parts, input.capacity) {
                Ok(item) => items.push(item),
                Err(error) => debug!(%error, ?combo, "discarded malformed route item"),
            }
        }
        (items, permutations)
    }

    /// Fastest ordering and exit pair for the combination.
    ///
    /// The time of a trip does not depend on how many people are lifted, so
    /// one search serves every count vector of the combination.
    fn best_route(
        &self,
        combo: &[VertexId],
        input: &GenerationInput<'_>,
    ) -> (Option<Route>, usize) {
        let carry = self.tuning.carry_multiplier;
        let mut order = combo.to_vec();
        order.sort();

        let mut best: Option<Route> = None;
        let mut evaluated = 0;
        loop {
            evaluated += 1;
            if let Some(route) = route_for_order(&order, carry, input) {
                let better = best
                    .as_ref()
                    .map_or(true, |current| route.time < current.time);
                if better {
                    best = Some(route);
                }
            }
            if !next_permutation(&mut order) {
                break;
            }
        }
        (best, evaluated)
    }

    fn score(&self, mut parts: RouteItemParts, input: &GenerationInput<'_>) -> RouteItemParts {
        let weighted: f64 = parts
            .vector
            .iter()
            .map(|(room, count)| {
                let priority = input.demand.get(room).map_or(1.0, |demand| demand.priority);
                f64::from(*count) * priority * self.proximity_boost(*room, input.proximity)
            })
            .sum();
        let people: u32 = parts.vector.values().sum();
        let shortage = input.capacity.saturating_sub(people);

        let raw = weighted / parts.time.max(self.tuning.epsilon);
        let penalty_factor = 1.0 / (1.0 + f64::from(shortage) * self.tuning.penalty_rate);
        parts.value = raw * penalty_factor;
        parts.penalty_factor = penalty_factor;
        parts
    }

    fn proximity_boost(&self, room: VertexId, proximity: Option<&BTreeMap<VertexId, u32>>) -> f64 {
        if self.tuning.fire_weight == 0.0 {
            return 1.0;
        }
        proximity
            .and_then(|hops| hops.get(&room))
            .map_or(1.0, |hops| 1.0 + self.tuning.fire_weight / (1.0 + f64::from(*hops)))
    }
}

/// Hop distance from the fire origin to every reachable vertex.
#[must_use]
pub fn fire_proximity(graph: &Graph, origin: VertexId) -> BTreeMap<VertexId, u32> {
    hop_distances(graph, origin)
}

#[derive(Clone, Debug)]
struct Route {
    order: Vec<VertexId>,
    entry: VertexId,
    drop: VertexId,
    path: Vec<VertexId>,
    time: f64,
}

/// Walks the order in-scene: the entry leg is unloaded, every leg from the
/// first pick-up on is loaded. Entry and drop exits are chosen independently
/// since each only touches one end of the trip.
fn route_for_order(order: &[VertexId], carry: f64, input: &GenerationInput<'_>) -> Option<Route> {
    let first = *order.first()?;
    let last = *order.last()?;
    let table = input.distances;

    let (entry, entry_time) = input
        .exits
        .iter()
        .filter_map(|exit| table.distance(*exit, first).map(|time| (*exit, time)))
        .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))?;
    let (drop, drop_time) = input
        .exits
        .iter()
        .filter_map(|exit| table.distance(last, *exit).map(|time| (*exit, time)))
        .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))?;

    let mut time = entry_time + drop_time * carry;
    let mut path = table.path(entry, first)?;
    for pair in order.windows(2) {
        time += table.distance(pair[0], pair[1])? * carry;
        let leg = table.path(pair[0], pair[1])?;
        path.extend(leg.into_iter().skip(1));
    }
    let tail = table.path(last, drop)?;
    path.extend(tail.into_iter().skip(1));

    Some(Route {
        order: order.to_vec(),
        entry,
        drop,
        path,
        time,
    })
}

/// Keeps single-room items and the combined items strictly faster than the
/// sum of their best single-room trips.
fn prune_dominated(items: Vec<RouteItem>) -> Vec<RouteItem> {
    let mut singles: BTreeMap<(VertexId, u32), f64> = BTreeMap::new();
    for item in items.iter().filter(|item| item.room_count() == 1) {
        if let Some((room, count)) = item.vector().iter().next() {
            let best = singles.entry((*room, *count)).or_insert(f64::INFINITY);
            *best = best.min(item.time());
        }
    }

    items
        .into_iter()
        .filter(|item| {
            if item.room_count() == 1 {
                return true;
            }
            let separate: f64 = item
                .vector()
                .iter()
                .map(|(room, count)| {
                    singles
                        .get(&(*room, *count))
                        .copied()
                        .unwrap_or(f64::INFINITY)
                })
                .sum();
            separate.is_finite() && item.time() < separate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use fire_rescue_core::{Edge, EdgeKey, Vertex, VertexKind};
    use fire_rescue_system_distance::{all_pairs, UNLOADED};

    use super::*;

    fn v(id: u32) -> VertexId {
        VertexId::new(id)
    }

    // exit 0 - hall 1 - rooms 2, 3 (both off the hall)
    fn hall_graph() -> Graph {
        Graph::new(
            vec![
                Vertex::new(v(0), VertexKind::Exit),
                Vertex::new(v(1), VertexKind::Corridor),
                Vertex::new(v(2), VertexKind::Room),
                Vertex::new(v(3), VertexKind::Room).with_priority(2.0),
            ],
            vec![
                Edge::new(v(0), v(1)),
                Edge::new(v(1), v(2)),
                Edge::new(v(1), v(3)),
            ],
        )
        .expect("valid graph")
    }

    fn demand(entries: &[(u32, u32, f64)]) -> BTreeMap<VertexId, RoomDemand> {
        entries
            .iter()
            .map(|(room, incapable, priority)| {
                (
                    v(*room),
                    RoomDemand {
                        incapable: *incapable,
                        priority: *priority,
                    },
                )
            })
            .collect()
    }

    fn generate(
        graph: &Graph,
        demand: &BTreeMap<VertexId, RoomDemand>,
        capacity: u32,
    ) -> Generation {
        let exits: Vec<VertexId> = graph.exits().collect();
        let table = all_pairs(graph, demand.keys().copied(), UNLOADED);
        let input = GenerationInput {
            demand,
            exits: &exits,
            distances: &table,
            proximity: None,
            capacity,
        };
        RouteItemGenerator::default().generate(&input)
    }

    #[test]
    fn single_room_time_charges_carry_only_after_pickup() {
        let graph = hall_graph();
        let generation = generate(&graph, &demand(&[(2, 1, 1.0)]), 1);
        assert_eq!(generation.items.len(), 1);
        let item = &generation.items[0];
        // 2 hops in unloaded, 2 hops out at 2x.
        assert_eq!(item.time(), 6.0);
        assert_eq!(item.path(), &[v(0), v(1), v(2), v(1), v(0)]);
    }

    #[test]
    fn combined_trip_survives_when_faster_than_separate_trips() {
        let graph = hall_graph();
        let generation = generate(&graph, &demand(&[(2, 1, 1.0), (3, 1, 1.0)]), 2);
        let combined = generation
            .items
            .iter()
            .find(|item| item.room_count() == 2)
            .expect("combined trip kept");
        // 2 unloaded + (2 + 2) loaded = 10 < 6 + 6.
        assert_eq!(combined.time(), 10.0);
        assert_eq!(combined.people(), 2);
    }

    #[test]
    fn combined_trip_is_pruned_when_not_strictly_faster() {
        // Rooms sit at opposite ends of a line with an exit in the middle:
        // a combined trip is never faster than two single trips.
        let graph = Graph::new(
            vec![
                Vertex::new(v(0), VertexKind::Exit),
                Vertex::new(v(1), VertexKind::Room),
                Vertex::new(v(2), VertexKind::Room),
            ],
            vec![Edge::new(v(1), v(0)), Edge::new(v(0), v(2))],
        )
        .expect("valid graph");
        let generation = generate(&graph, &demand(&[(1, 1, 1.0), (2, 1, 1.0)]), 2);
        assert!(generation.items.iter().all(|item| item.room_count() == 1));
        assert!(generation.stats.pruned > 0);
    }

    #[test]
    fn unreachable_rooms_yield_no_items() {
        let mut graph = hall_graph();
        let _ = graph.burn(EdgeKey::new(v(1), v(3)));
        let generation = generate(&graph, &demand(&[(2, 1, 1.0), (3, 2, 1.0)]), 3);
        assert!(generation
            .items
            .iter()
            .all(|item| item.count_for(v(3)) == 0));
        assert!(!generation.items.is_empty());
    }

    #[test]
    fn priority_raises_value_density() {
        let graph = hall_graph();
        let generation = generate(&graph, &demand(&[(2, 1, 1.0), (3, 1, 2.0)]), 1);
        let best = &generation.items[0];
        assert_eq!(best.visiting_order(), &[v(3)]);
    }

    #[test]
    fn fire_proximity_boosts_rooms_near_origin() {
        let graph = hall_graph();
        let demand = demand(&[(2, 1, 1.0), (3, 1, 1.0)]);
        let exits: Vec<VertexId> = graph.exits().collect();
        let table = all_pairs(&graph, demand.keys().copied(), UNLOADED);
        let proximity = fire_proximity(&graph, v(2));
        let input = GenerationInput {
            demand: &demand,
            exits: &exits,
            distances: &table,
            proximity: Some(&proximity),
            capacity: 1,
        };
        let generator = RouteItemGenerator::new(GeneratorTuning {
            fire_weight: 1.0,
            ..GeneratorTuning::default()
        });
        let generation = generator.generate(&input);
        assert_eq!(generation.items[0].visiting_order(), &[v(2)]);
    }
}
