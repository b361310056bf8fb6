#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Exploration-phase coordinator.
//!
//! Unvisited rooms are split between agents with balanced K-medoids on
//! graph distance. Each partition is turned into a minimum spanning forest
//! whose depth-first pre-order becomes the agent's sweep order. Agents
//! instruct self-capable occupants wherever they find them, and the whole
//! partition is rebuilt whenever the set of burned edges changes.

use std::collections::{BTreeMap, BTreeSet};

use fire_rescue_core::{
    Action, ActionBudget, AgentActions, AgentId, AgentSnapshot, BurnDigest, Graph, StateSnapshot,
    VertexId,
};
use fire_rescue_system_distance::{all_pairs, nearest, next_hop, reachable_exits, UNLOADED};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

mod clustering;

use clustering::{k_medoids, preorder, spanning_forest};

/// Knobs controlling the exploration sweep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationTuning {
    /// Seed for the initial medoid draw; replans derive their seed from it.
    pub seed: u64,
    /// Cap on K-medoids refinement iterations.
    pub max_iterations: usize,
    /// Ticks without discovery, with every agent idle, before giving up.
    pub stall_window: u64,
}

impl Default for ExplorationTuning {
    fn default() -> Self {
        Self {
            seed: 0x5eed_f17e,
            max_iterations: 32,
            stall_window: 8,
        }
    }
}

/// Progress of the sweep after a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExplorationStatus {
    /// Rooms remain to be visited.
    Sweeping,
    /// Every room has been visited.
    Complete,
    /// Agents stopped making progress; the listed rooms are deemed unreachable.
    Stalled {
        /// Rooms that were never visited.
        unreachable: BTreeSet<VertexId>,
    },
}

impl ExplorationStatus {
    /// Reports whether the sweep is over, successfully or not.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Sweeping)
    }
}

/// Sweep assignment of one agent.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    medoid: VertexId,
    rooms: BTreeSet<VertexId>,
    tree: BTreeMap<VertexId, BTreeSet<VertexId>>,
    order: Vec<VertexId>,
    cursor: usize,
}

impl Cluster {
    /// Representative room of the cluster.
    #[must_use]
    pub const fn medoid(&self) -> VertexId {
        self.medoid
    }

    /// Rooms the cluster covers.
    #[must_use]
    pub fn rooms(&self) -> &BTreeSet<VertexId> {
        &self.rooms
    }

    /// Spanning forest adjacency over the cluster rooms.
    #[must_use]
    pub fn tree(&self) -> &BTreeMap<VertexId, BTreeSet<VertexId>> {
        &self.tree
    }

    /// Visiting order derived from the spanning forest.
    #[must_use]
    pub fn order(&self) -> &[VertexId] {
        &self.order
    }

    /// Index of the next room in [`Cluster::order`].
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Next room worth walking to, skipping visited and unreachable ones.
    fn next_room(
        &mut self,
        graph: &Graph,
        position: VertexId,
        seen: &BTreeSet<VertexId>,
    ) -> Option<VertexId> {
        while let Some(room) = self.order.get(self.cursor).copied() {
            let reachable = room == position || next_hop(graph, position, room).is_some();
            if !seen.contains(&room) && reachable {
                return Some(room);
            }
            self.cursor += 1;
        }
        None
    }
}

/// Coordinates the discovery sweep of every agent.
#[derive(Clone, Debug)]
pub struct ExplorationCoordinator {
    tuning: ExplorationTuning,
    budget: ActionBudget,
    clusters: BTreeMap<AgentId, Cluster>,
    homes: BTreeMap<AgentId, VertexId>,
    digest: Option<BurnDigest>,
    replans: u64,
    last_visited: usize,
    quiet_ticks: u64,
    status: ExplorationStatus,
}

impl ExplorationCoordinator {
    /// Creates a coordinator that plans on the first handled snapshot.
    #[must_use]
    pub fn new(tuning: ExplorationTuning, budget: ActionBudget) -> Self {
        Self {
            tuning,
            budget,
            clusters: BTreeMap::new(),
            homes: BTreeMap::new(),
            digest: None,
            replans: 0,
            last_visited: 0,
            quiet_ticks: 0,
            status: ExplorationStatus::Sweeping,
        }
    }

    /// Current cluster per agent.
    #[must_use]
    pub fn clusters(&self) -> &BTreeMap<AgentId, Cluster> {
        &self.clusters
    }

    /// Exit each agent returns to once it runs out of work.
    #[must_use]
    pub fn homes(&self) -> &BTreeMap<AgentId, VertexId> {
        &self.homes
    }

    /// Number of partitions built so far.
    #[must_use]
    pub const fn replans(&self) -> u64 {
        self.replans
    }

    /// Status reported by the last handled tick.
    #[must_use]
    pub fn status(&self) -> &ExplorationStatus {
        &self.status
    }

    /// Rebuilds the partition when the burned-edge set changed.
    ///
    /// Returns `false` without touching any state when the digest matches the
    /// one the current partition was built for.
    pub fn replan(&mut self, snapshot: &StateSnapshot) -> bool {
        let digest = snapshot.graph.burn_digest();
        if self.digest == Some(digest) {
            return false;
        }
        self.digest = Some(digest);
        self.replans += 1;
        self.assign_homes(snapshot);
        self.partition(snapshot);
        info!(
            tick = snapshot.tick,
            replans = self.replans,
            clusters = self.clusters.len(),
            %digest,
            "exploration partition rebuilt"
        );
        true
    }

    /// Emits this tick's sweep actions and reports the sweep status.
    pub fn handle(
        &mut self,
        snapshot: &StateSnapshot,
        out: &mut AgentActions,
    ) -> ExplorationStatus {
        let _ = self.replan(snapshot);

        let mut seen = snapshot.visited();
        let mut instructed: BTreeSet<VertexId> = BTreeSet::new();
        let mut acted = false;
        let mut discovered = false;
        for agent in &snapshot.agents {
            let actions = self.drive(agent, snapshot, &mut seen, &mut instructed);
            acted |= !actions.is_empty();
            discovered |= actions.contains(&Action::Instruct);
            if !actions.is_empty() {
                let _ = out.insert(agent.id, actions);
            }
        }

        let visited = snapshot.visited().len();
        if visited > self.last_visited || discovered || acted {
            self.quiet_ticks = 0;
        } else {
            self.quiet_ticks += 1;
        }
        self.last_visited = visited;

        let unvisited = snapshot.unvisited_rooms();
        let status = if unvisited.is_empty() {
            ExplorationStatus::Complete
        } else if self.quiet_ticks >= self.tuning.stall_window {
            if !matches!(self.status, ExplorationStatus::Stalled { .. }) {
                warn!(
                    tick = snapshot.tick,
                    rooms = ?unvisited,
                    "exploration stalled, declaring remaining rooms unreachable"
                );
            }
            ExplorationStatus::Stalled {
                unreachable: unvisited,
            }
        } else {
            ExplorationStatus::Sweeping
        };
        self.status = status.clone();
        status
    }

    fn drive(
        &mut self,
        agent: &AgentSnapshot,
        snapshot: &StateSnapshot,
        seen: &mut BTreeSet<VertexId>,
        instructed: &mut BTreeSet<VertexId>,
    ) -> Vec<Action> {
        let graph = &snapshot.graph;
        let mut position = agent.position;
        let mut actions = Vec::new();

        while actions.len() < self.budget.limit() {
            let waiting = snapshot.occupants_at(position).capable > 0;
            if waiting && instructed.insert(position) {
                actions.push(Action::Instruct);
                continue;
            }

            let Some(target) = self.next_target(agent.id, position, snapshot, seen, instructed)
            else {
                break;
            };
            if target == position {
                break;
            }
            let Some(hop) = next_hop(graph, position, target) else {
                break;
            };
            actions.push(Action::Move { target: hop });
            position = hop;
            let _ = seen.insert(hop);
        }
        actions
    }

    /// Cluster order first, then capable occupants, unvisited rooms, home.
    fn next_target(
        &mut self,
        agent: AgentId,
        position: VertexId,
        snapshot: &StateSnapshot,
        seen: &BTreeSet<VertexId>,
        instructed: &BTreeSet<VertexId>,
    ) -> Option<VertexId> {
        let graph = &snapshot.graph;
        if let Some(room) = self
            .clusters
            .get_mut(&agent)
            .and_then(|cluster| cluster.next_room(graph, position, seen))
        {
            return Some(room);
        }

        let waiting = nearest(graph, position, |vertex| {
            snapshot.occupants_at(vertex).capable > 0 && !instructed.contains(&vertex)
        });
        if waiting.is_some() {
            return waiting;
        }

        let unvisited = nearest(graph, position, |vertex| {
            !seen.contains(&vertex) && graph.vertex(vertex).is_some_and(|v| v.is_room())
        });
        if unvisited.is_some() {
            return unvisited;
        }

        let home = self.homes.get(&agent).copied();
        match home {
            Some(exit) if exit == position || next_hop(graph, position, exit).is_some() => {
                Some(exit)
            }
            _ => {
                let fallback = reachable_exits(graph, position).first().copied();
                if let Some(exit) = fallback {
                    debug!(
                        agent = agent.get(),
                        exit = exit.get(),
                        "home exit reassigned"
                    );
                    let _ = self.homes.insert(agent, exit);
                }
                fallback
            }
        }
    }

    /// Nearest reachable exit per agent; kept across replans while reachable.
    fn assign_homes(&mut self, snapshot: &StateSnapshot) {
        let graph = &snapshot.graph;
        for agent in &snapshot.agents {
            let current = self.homes.get(&agent.id).copied();
            let still_reachable = current.is_some_and(|exit| {
                exit == agent.position || next_hop(graph, agent.position, exit).is_some()
            });
            if still_reachable {
                continue;
            }
            let home = reachable_exits(graph, agent.position)
                .first()
                .copied()
                .unwrap_or(agent.position);
            let _ = self.homes.insert(agent.id, home);
        }
    }

    fn partition(&mut self, snapshot: &StateSnapshot) {
        self.clusters.clear();
        let rooms: Vec<VertexId> = snapshot.unvisited_rooms().into_iter().collect();
        let k = snapshot.agents.len().min(rooms.len());
        if k == 0 {
            return;
        }

        let sources = rooms
            .iter()
            .copied()
            .chain(snapshot.agents.iter().map(|agent| agent.position));
        let table = all_pairs(&snapshot.graph, sources, UNLOADED);
        let cost = |a: VertexId, b: VertexId| table.distance(a, b);

        let mut rng = ChaCha8Rng::seed_from_u64(self.tuning.seed.wrapping_add(self.replans));
        let partitions = k_medoids(&rooms, k, cost, &mut rng, self.tuning.max_iterations);

        // Agents claim the medoid closest to them, cheapest pair first.
        let mut pairs: Vec<(f64, AgentId, usize)> = Vec::new();
        for agent in &snapshot.agents {
            for (index, partition) in partitions.iter().enumerate() {
                let distance = cost(agent.position, partition.medoid).unwrap_or(f64::MAX);
                pairs.push((distance, agent.id, index));
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut taken: BTreeSet<usize> = BTreeSet::new();
        for (_, agent, index) in pairs {
            if self.clusters.contains_key(&agent) || taken.contains(&index) {
                continue;
            }
            let Some(partition) = partitions.get(index) else {
                continue;
            };
            let Some(position) = snapshot.agent(agent).map(|found| found.position) else {
                continue;
            };
            let _ = taken.insert(index);

            let tree = spanning_forest(&partition.members, cost);
            let start = partition
                .members
                .iter()
                .copied()
                .min_by(|a, b| {
                    let to_a = cost(position, *a).unwrap_or(f64::MAX);
                    let to_b = cost(position, *b).unwrap_or(f64::MAX);
                    to_a.total_cmp(&to_b).then_with(|| a.cmp(b))
                })
                .unwrap_or(partition.medoid);
            let order = preorder(&tree, start, cost);
            debug!(
                agent = agent.get(),
                medoid = partition.medoid.get(),
                rooms = order.len(),
                "cluster assigned"
            );
            let _ = self.clusters.insert(
                agent,
                Cluster {
                    medoid: partition.medoid,
                    rooms: partition.members.iter().copied().collect(),
                    tree,
                    order,
                    cursor: 0,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use fire_rescue_core::{Edge, EdgeKey, OccupantCounts, Vertex, VertexKind};

    use super::*;

    fn v(id: u32) -> VertexId {
        VertexId::new(id)
    }

    /// Exit 0 in the middle of a corridor with five rooms down each wing.
    fn two_wings() -> Graph {
        let mut vertices = vec![Vertex::new(v(0), VertexKind::Exit)];
        vertices.extend((1..=10).map(|id| Vertex::new(v(id), VertexKind::Room)));
        let mut edges = vec![Edge::new(v(0), v(1)), Edge::new(v(0), v(6))];
        edges.extend((1..5).map(|id| Edge::new(v(id), v(id + 1))));
        edges.extend((6..10).map(|id| Edge::new(v(id), v(id + 1))));
        Graph::new(vertices, edges).expect("valid graph")
    }

    fn snapshot(graph: Graph, positions: &[u32]) -> StateSnapshot {
        StateSnapshot {
            tick: 0,
            graph,
            agents: positions
                .iter()
                .enumerate()
                .map(|(index, position)| AgentSnapshot {
                    id: AgentId::new(u32::try_from(index).expect("few agents")),
                    position: v(*position),
                    carrying: 0,
                    capacity: 3,
                    visited: BTreeSet::from([v(*position)]),
                })
                .collect(),
            occupants: BTreeMap::new(),
        }
    }

    fn coordinator() -> ExplorationCoordinator {
        ExplorationCoordinator::new(ExplorationTuning::default(), ActionBudget::DEFAULT)
    }

    #[test]
    fn clusters_partition_unvisited_rooms_exactly() {
        let mut state = snapshot(two_wings(), &[0, 0]);
        let _ = state.agents[0].visited.insert(v(1));
        let mut explorer = coordinator();
        assert!(explorer.replan(&state));

        let mut covered: Vec<VertexId> = explorer
            .clusters()
            .values()
            .flat_map(|cluster| cluster.rooms().iter().copied())
            .collect();
        covered.sort();
        let expected: Vec<VertexId> = state.unvisited_rooms().into_iter().collect();
        assert_eq!(covered, expected);

        for cluster in explorer.clusters().values() {
            let ordered: BTreeSet<VertexId> = cluster.order().iter().copied().collect();
            assert_eq!(&ordered, cluster.rooms());
            assert_eq!(cluster.order().len(), cluster.rooms().len());
        }
    }

    #[test]
    fn symmetric_wings_split_evenly_between_two_agents() {
        let state = snapshot(two_wings(), &[0, 0]);
        let mut explorer = coordinator();
        assert!(explorer.replan(&state));

        let sizes: Vec<usize> = explorer
            .clusters()
            .values()
            .map(|cluster| cluster.rooms().len())
            .collect();
        assert_eq!(sizes.len(), 2);
        for size in sizes {
            assert!((4..=6).contains(&size), "unbalanced cluster of {size}");
        }
        let first = explorer.clusters()[&AgentId::new(0)].rooms();
        let second = explorer.clusters()[&AgentId::new(1)].rooms();
        assert!(first.is_disjoint(second));
    }

    #[test]
    fn unchanged_burn_set_does_not_replan() {
        let mut state = snapshot(two_wings(), &[0, 0]);
        let mut explorer = coordinator();
        assert!(explorer.replan(&state));
        let clusters = explorer.clusters().clone();

        state.tick = 5;
        assert!(!explorer.replan(&state));
        assert_eq!(explorer.clusters(), &clusters);
        assert_eq!(explorer.replans(), 1);

        assert!(state.graph.burn(EdgeKey::new(v(4), v(5))));
        assert!(explorer.replan(&state));
        assert_eq!(explorer.replans(), 2);
    }

    #[test]
    fn instructs_before_moving_and_respects_budget() {
        let mut state = snapshot(two_wings(), &[0]);
        let _ = state.occupants.insert(
            v(0),
            OccupantCounts {
                capable: 2,
                ..OccupantCounts::default()
            },
        );
        let mut explorer = coordinator();
        let mut actions = AgentActions::new();
        let status = explorer.handle(&state, &mut actions);

        assert_eq!(status, ExplorationStatus::Sweeping);
        let batch = &actions[&AgentId::new(0)];
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], Action::Instruct);
        assert!(matches!(batch[1], Action::Move { .. }));
    }

    #[test]
    fn stalls_after_window_when_rooms_are_cut_off() {
        let mut graph = two_wings();
        assert!(graph.burn(EdgeKey::new(v(0), v(6))));
        let mut state = snapshot(graph, &[0]);
        state.agents[0].visited.extend((1..=5).map(v));

        let mut explorer = ExplorationCoordinator::new(
            ExplorationTuning {
                stall_window: 3,
                ..ExplorationTuning::default()
            },
            ActionBudget::DEFAULT,
        );
        let mut statuses = Vec::new();
        for tick in 0..4 {
            state.tick = tick;
            let mut actions = AgentActions::new();
            statuses.push(explorer.handle(&state, &mut actions));
            assert!(actions.is_empty());
        }

        // The first tick counts as progress since it discovers the visited set.
        assert_eq!(statuses[2], ExplorationStatus::Sweeping);
        assert_eq!(
            statuses[3],
            ExplorationStatus::Stalled {
                unreachable: (6..=10).map(v).collect()
            }
        );
    }
}
