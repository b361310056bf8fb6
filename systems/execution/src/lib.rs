#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Per-agent execution of assigned rescue routes.
//!
//! Every agent owns a queue of [`ExecutionPlan`] values. Each tick the
//! coordinator walks the front plan of every queue as a small state machine,
//! translating it into at most [`ActionBudget::limit`] atomic actions. Actions
//! are simulated optimistically inside the tick so that a move followed by a
//! pick-up uses the position the move leads to; the next snapshot is then used
//! to reconcile pick-ups the environment did not honour.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use fire_rescue_core::{
    Action, ActionBudget, AgentActions, AgentId, RouteItem, StateSnapshot, Vertex, VertexId,
};
use fire_rescue_system_distance::{next_hop, reachable_exits};
use tracing::{debug, info, warn};

/// Upper bound on state transitions evaluated per agent per tick.
const MAX_TRANSITIONS: usize = 512;

/// Stage of an execution plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlanStage {
    /// The agent walks to the entry exit of the route.
    TravelingToEntry,
    /// The agent follows the route path, lifting and dropping occupants.
    Executing,
}

/// Runtime state of one assigned route.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionPlan {
    item: RouteItem,
    waypoints: Vec<VertexId>,
    cursor: usize,
    rescued: BTreeMap<VertexId, u32>,
    settled: BTreeSet<VertexId>,
    stage: PlanStage,
}

impl ExecutionPlan {
    /// Starts a plan for `item` before the agent heads to its entry exit.
    #[must_use]
    pub fn new(item: RouteItem) -> Self {
        let waypoints = item.path().to_vec();
        let rescued = item.vector().keys().map(|room| (*room, 0)).collect();
        Self {
            item,
            waypoints,
            cursor: 0,
            rescued,
            settled: BTreeSet::new(),
            stage: PlanStage::TravelingToEntry,
        }
    }

    /// Route the plan realises.
    #[must_use]
    pub fn item(&self) -> &RouteItem {
        &self.item
    }

    /// Current stage of the plan.
    #[must_use]
    pub const fn stage(&self) -> PlanStage {
        self.stage
    }

    /// Index of the next waypoint to reach.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Remaining waypoints, including any drop retarget.
    #[must_use]
    pub fn waypoints(&self) -> &[VertexId] {
        &self.waypoints
    }

    /// People lifted from `room` so far.
    #[must_use]
    pub fn rescued_from(&self, room: VertexId) -> u32 {
        self.rescued.get(&room).copied().unwrap_or(0)
    }

    /// People still to lift from `room`; zero once the room is settled.
    #[must_use]
    pub fn owed(&self, room: VertexId) -> u32 {
        if self.settled.contains(&room) {
            return 0;
        }
        let rescued = self.rescued_from(room);
        self.item.count_for(room).saturating_sub(rescued)
    }

    /// Rooms abandoned because they held fewer people than planned.
    #[must_use]
    pub fn settled(&self) -> &BTreeSet<VertexId> {
        &self.settled
    }

    /// Reports whether every room of the route has been served.
    #[must_use]
    pub fn rooms_done(&self) -> bool {
        self.item.vector().keys().all(|room| self.owed(*room) == 0)
    }

    /// Reports whether the plan is finished for an agent carrying `carrying`.
    #[must_use]
    pub fn is_complete(&self, carrying: u32) -> bool {
        self.cursor >= self.waypoints.len() && self.rooms_done() && carrying == 0
    }

    fn has_progress(&self) -> bool {
        self.rescued.values().any(|count| *count > 0)
    }

    fn record_pickup(&mut self, room: VertexId, count: u32) {
        if let Some(rescued) = self.rescued.get_mut(&room) {
            *rescued = (*rescued + count).min(self.item.count_for(room));
        }
    }

    fn settle(&mut self, room: VertexId) {
        let _ = self.settled.insert(room);
    }

    /// Undoes `count` lifted people and schedules a revisit of `room`.
    fn roll_back(&mut self, room: VertexId, count: u32, position: VertexId) {
        if let Some(rescued) = self.rescued.get_mut(&room) {
            *rescued = rescued.saturating_sub(count);
        }
        let ahead = self.waypoints.get(self.cursor..).unwrap_or_default();
        if position != room && !ahead.contains(&room) {
            let at = self.cursor.min(self.waypoints.len());
            self.waypoints.insert(at, room);
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.item.clone());
    }
}

/// Drives the execution plans of every agent.
#[derive(Clone, Debug, Default)]
pub struct ExecutionCoordinator {
    budget: ActionBudget,
    queues: BTreeMap<AgentId, VecDeque<ExecutionPlan>>,
    checks: BTreeMap<AgentId, PickupCheck>,
    trapped: BTreeSet<AgentId>,
}

/// Carrying the agent should report next tick if every pick-up succeeded.
#[derive(Clone, Debug, Default)]
struct PickupCheck {
    expected: u32,
    pickups: Vec<(VertexId, u32)>,
}

/// Optimistic view of an agent while its actions for the tick are chosen.
#[derive(Clone, Debug)]
struct Walker {
    position: VertexId,
    carrying: u32,
    capacity: u32,
    pickups: Vec<(VertexId, u32)>,
}

enum Transition {
    Act(Action),
    Continue,
    Complete,
    Wait,
}

impl ExecutionCoordinator {
    /// Creates an empty coordinator bounded by `budget`.
    #[must_use]
    pub fn new(budget: ActionBudget) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    /// Budget applied to every agent.
    #[must_use]
    pub const fn budget(&self) -> ActionBudget {
        self.budget
    }

    /// Replaces every queue with the provided per-agent routes.
    pub fn load(&mut self, assignment: BTreeMap<AgentId, Vec<RouteItem>>) {
        self.checks.clear();
        self.trapped.clear();
        self.queues = assignment
            .into_iter()
            .map(|(agent, items)| (agent, items.into_iter().map(ExecutionPlan::new).collect()))
            .collect();
        info!(
            agents = self.queues.len(),
            plans = self.pending(),
            "execution plans loaded"
        );
    }

    /// Number of plans not yet completed across all agents.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Reports whether no agent has work left.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Plans queued for `agent`, front first.
    pub fn queue(&self, agent: AgentId) -> impl Iterator<Item = &ExecutionPlan> {
        self.queues.get(&agent).into_iter().flatten()
    }

    /// Agents found without any reachable exit.
    #[must_use]
    pub fn trapped(&self) -> &BTreeSet<AgentId> {
        &self.trapped
    }

    /// Emits this tick's actions for every agent with queued work.
    pub fn handle(&mut self, snapshot: &StateSnapshot, out: &mut AgentActions) {
        self.reconcile_pickups(snapshot);
        self.redistribute_trapped(snapshot);

        let budget = self.budget;
        let mut claimed: BTreeMap<VertexId, u32> = BTreeMap::new();
        for agent in &snapshot.agents {
            if self.trapped.contains(&agent.id) {
                continue;
            }
            let Some(queue) = self.queues.get_mut(&agent.id) else {
                continue;
            };

            let mut walker = Walker {
                position: agent.position,
                carrying: agent.carrying,
                capacity: agent.capacity,
                pickups: Vec::new(),
            };
            let mut actions = Vec::new();
            drive(
                queue,
                &mut walker,
                snapshot,
                &mut claimed,
                budget,
                &mut actions,
            );
            budget.truncate(&mut actions);

            if !walker.pickups.is_empty() {
                let _ = self.checks.insert(
                    agent.id,
                    PickupCheck {
                        expected: walker.carrying,
                        pickups: walker.pickups,
                    },
                );
            }
            if !actions.is_empty() {
                let _ = out.insert(agent.id, actions);
            }
        }
    }

    /// Rolls back pick-ups the environment did not honour.
    fn reconcile_pickups(&mut self, snapshot: &StateSnapshot) {
        for (id, check) in std::mem::take(&mut self.checks) {
            let Some(agent) = snapshot.agent(id) else {
                continue;
            };
            let mut shortfall = check.expected.saturating_sub(agent.carrying);
            if shortfall == 0 {
                continue;
            }
            warn!(
                agent = id.get(),
                shortfall,
                "pick-up shortfall, rolling back"
            );
            let Some(plan) = self.queues.get_mut(&id).and_then(VecDeque::front_mut) else {
                continue;
            };
            for (room, count) in check.pickups.iter().rev() {
                if shortfall == 0 {
                    break;
                }
                let undo = shortfall.min(*count);
                plan.roll_back(*room, undo, agent.position);
                shortfall -= undo;
            }
        }
    }

    /// Moves the queued plans of agents without a reachable exit to others.
    fn redistribute_trapped(&mut self, snapshot: &StateSnapshot) {
        let mut newly_trapped = Vec::new();
        for agent in &snapshot.agents {
            let has_work = self
                .queues
                .get(&agent.id)
                .is_some_and(|queue| !queue.is_empty());
            if !has_work || self.trapped.contains(&agent.id) {
                continue;
            }
            if reachable_exits(&snapshot.graph, agent.position).is_empty() {
                newly_trapped.push(agent.id);
            }
        }
        if newly_trapped.is_empty() {
            return;
        }

        for id in &newly_trapped {
            let _ = self.trapped.insert(*id);
        }
        let active: Vec<AgentId> = snapshot
            .agents
            .iter()
            .map(|agent| agent.id)
            .filter(|id| !self.trapped.contains(id))
            .collect();

        for id in newly_trapped {
            let plans = self.queues.remove(&id).unwrap_or_default();
            warn!(
                agent = id.get(),
                plans = plans.len(),
                "agent trapped, redistributing plans"
            );
            let _ = self.queues.insert(id, VecDeque::new());

            for mut plan in plans {
                if plan.has_progress() {
                    warn!(
                        agent = id.get(),
                        rooms = ?plan.item().visiting_order(),
                        "dropping partially executed plan of trapped agent"
                    );
                    continue;
                }
                let target = active
                    .iter()
                    .min_by_key(|candidate| {
                        (
                            self.queues.get(*candidate).map_or(0, VecDeque::len),
                            **candidate,
                        )
                    })
                    .copied();
                let Some(target) = target else {
                    warn!(agent = id.get(), "no active agent left to take over plan");
                    continue;
                };
                plan.reset();
                self.queues.entry(target).or_default().push_back(plan);
            }
        }
    }
}

fn drive(
    queue: &mut VecDeque<ExecutionPlan>,
    walker: &mut Walker,
    snapshot: &StateSnapshot,
    claimed: &mut BTreeMap<VertexId, u32>,
    budget: ActionBudget,
    actions: &mut Vec<Action>,
) {
    for _ in 0..MAX_TRANSITIONS {
        if actions.len() >= budget.limit() {
            break;
        }
        let Some(plan) = queue.front_mut() else {
            break;
        };
        match step(plan, walker, snapshot, claimed) {
            Transition::Act(action) => actions.push(action),
            Transition::Continue => {}
            Transition::Complete => {
                let _ = queue.pop_front();
                debug!(remaining = queue.len(), "execution plan complete");
            }
            Transition::Wait => break,
        }
    }
}

fn step(
    plan: &mut ExecutionPlan,
    walker: &mut Walker,
    snapshot: &StateSnapshot,
    claimed: &mut BTreeMap<VertexId, u32>,
) -> Transition {
    let graph = &snapshot.graph;
    let position = walker.position;

    if plan.stage == PlanStage::TravelingToEntry {
        let entry = plan.item.entry_exit();
        if position == entry {
            plan.stage = PlanStage::Executing;
            return Transition::Continue;
        }
        return match next_hop(graph, position, entry) {
            Some(hop) => {
                walker.position = hop;
                Transition::Act(Action::Move { target: hop })
            }
            None => {
                debug!(
                    entry = entry.get(),
                    "entry exit unreachable, executing from here"
                );
                plan.stage = PlanStage::Executing;
                Transition::Continue
            }
        };
    }

    let owed = plan.owed(position);
    if owed > 0 {
        let taken = claimed.get(&position).copied().unwrap_or(0);
        let waiting = snapshot.occupants_at(position).incapable;
        let observed = waiting.saturating_sub(taken);
        let free = walker.capacity.saturating_sub(walker.carrying);
        let count = owed.min(observed).min(free);
        if count == 0 {
            info!(
                room = position.get(),
                owed,
                "room holds fewer people than planned"
            );
            plan.settle(position);
            return Transition::Continue;
        }
        plan.record_pickup(position, count);
        walker.carrying += count;
        walker.pickups.push((position, count));
        *claimed.entry(position).or_default() += count;
        return Transition::Act(Action::PickUp { count });
    }

    if plan.waypoints.get(plan.cursor) == Some(&position) {
        plan.cursor += 1;
        return Transition::Continue;
    }

    if plan.cursor >= plan.waypoints.len() {
        if walker.carrying > 0 {
            if graph.vertex(position).is_some_and(Vertex::is_exit) {
                // Drop-offs wait for the next snapshot to confirm this tick's pick-ups.
                if !walker.pickups.is_empty() {
                    return Transition::Wait;
                }
                walker.carrying = 0;
                return Transition::Act(Action::DropOff);
            }
            return match reachable_exits(graph, position).first() {
                Some(exit) => {
                    plan.waypoints.push(*exit);
                    Transition::Continue
                }
                None => Transition::Wait,
            };
        }
        if !plan.rooms_done() {
            let owed_rooms: Vec<VertexId> = plan
                .item
                .visiting_order()
                .iter()
                .copied()
                .filter(|room| plan.owed(*room) > 0)
                .collect();
            plan.waypoints.extend(owed_rooms);
            plan.waypoints.push(plan.item.drop_exit());
            return Transition::Continue;
        }
        return Transition::Complete;
    }

    let target = plan.waypoints[plan.cursor];
    if let Some(hop) = next_hop(graph, position, target) {
        walker.position = hop;
        return Transition::Act(Action::Move { target: hop });
    }

    if plan.owed(target) > 0 {
        warn!(
            room = target.get(),
            "planned room unreachable, forfeiting its occupants"
        );
        plan.settle(target);
    }
    let is_last = plan.cursor + 1 == plan.waypoints.len();
    if is_last && walker.carrying > 0 {
        return match reachable_exits(graph, position).first() {
            Some(exit) => {
                info!(
                    from = target.get(),
                    to = exit.get(),
                    "drop exit unreachable, retargeting"
                );
                plan.waypoints[plan.cursor] = *exit;
                Transition::Continue
            }
            None => Transition::Wait,
        };
    }
    plan.cursor += 1;
    Transition::Continue
}
