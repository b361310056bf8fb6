use std::collections::BTreeMap;

use fire_rescue_core::{AgentId, Edge, Graph, RouteItem, Vertex, VertexId, VertexKind};
use fire_rescue_system_assignment::{
    assigner_for, is_empty, is_feasible, AssignerKind, AssignerTuning, Assignment,
    AssignmentStrategy, GreedyAssigner, LpAssigner,
};
use fire_rescue_system_distance::{all_pairs, UNLOADED};
use fire_rescue_system_route_items::{GenerationInput, RoomDemand, RouteItemGenerator};

fn v(id: u32) -> VertexId {
    VertexId::new(id)
}

/// Exit 0 sits ten units away from hub 10; rooms 1, 2, 3 are one unit off
/// the hub with priorities matching their id.
fn wing() -> Graph {
    let mut vertices = vec![
        Vertex::new(v(0), VertexKind::Exit),
        Vertex::new(v(10), VertexKind::Corridor),
    ];
    vertices.extend(
        (1..=3).map(|id| Vertex::new(v(id), VertexKind::Room).with_priority(f64::from(id))),
    );
    let mut edges = vec![Edge::new(v(0), v(10)).with_length(10.0)];
    edges.extend((1..=3).map(|id| Edge::new(v(10), v(id))));
    Graph::new(vertices, edges).expect("wing is valid")
}

fn items_for(graph: &Graph, remaining: &BTreeMap<VertexId, u32>) -> Vec<RouteItem> {
    let demand: BTreeMap<VertexId, RoomDemand> = remaining
        .iter()
        .map(|(room, incapable)| {
            let priority = graph.vertex(*room).map_or(1.0, Vertex::priority);
            (
                *room,
                RoomDemand {
                    incapable: *incapable,
                    priority,
                },
            )
        })
        .collect();
    let exits: Vec<VertexId> = graph.exits().collect();
    let table = all_pairs(graph, demand.keys().copied(), UNLOADED);
    let input = GenerationInput {
        demand: &demand,
        exits: &exits,
        distances: &table,
        proximity: None,
        capacity: 3,
    };
    RouteItemGenerator::default().generate(&input).items
}

fn selected(assignment: &Assignment) -> Vec<&RouteItem> {
    assignment.values().flatten().collect()
}

#[test]
fn both_strategies_pick_the_single_three_room_trip() {
    let graph = wing();
    let remaining = BTreeMap::from([(v(1), 1), (v(2), 1), (v(3), 1)]);
    let items = items_for(&graph, &remaining);

    let combined = items
        .iter()
        .find(|item| item.room_count() == 3)
        .expect("combined trip survives pruning");
    assert!((combined.time() - 41.0).abs() < 1e-9);
    assert!((combined.value() - 6.0 / 41.0).abs() < 1e-9);
    assert_eq!(items.first(), Some(combined));

    let agents = [AgentId::new(0), AgentId::new(1)];
    let strategies: [Box<dyn AssignmentStrategy>; 2] =
        [Box::new(GreedyAssigner), Box::new(LpAssigner::default())];
    for strategy in &strategies {
        let assignment = strategy.assign(&items, &agents, &remaining);
        assert_eq!(selected(&assignment), vec![combined]);
        assert_eq!(assignment[&AgentId::new(0)].len(), 1);
        assert!(assignment[&AgentId::new(1)].is_empty());
    }
}

#[test]
fn strategies_never_claim_more_than_remaining() {
    let graph = wing();
    let discovered = BTreeMap::from([(v(1), 3), (v(2), 2), (v(3), 4)]);
    let items = items_for(&graph, &discovered);
    assert!(!items.is_empty());

    // Part of the demand has already been served.
    let remaining = BTreeMap::from([(v(1), 1), (v(2), 2), (v(3), 1)]);
    let agents: Vec<AgentId> = (0..4).map(AgentId::new).collect();

    for strategy in [AssignerKind::Greedy, AssignerKind::Lp] {
        let assigner = assigner_for(&AssignerTuning {
            strategy,
            ..AssignerTuning::default()
        });
        let assignment = assigner.assign(&items, &agents, &remaining);
        assert_eq!(assignment.len(), agents.len());
        assert!(
            is_feasible(&assignment, &remaining),
            "{strategy:?} over-claimed"
        );
        assert!(!is_empty(&assignment));
    }
}

#[test]
fn no_items_leaves_every_agent_idle() {
    let agents = [AgentId::new(3), AgentId::new(7)];
    let remaining = BTreeMap::new();
    for strategy in [AssignerKind::Greedy, AssignerKind::Lp] {
        let assigner = assigner_for(&AssignerTuning {
            strategy,
            ..AssignerTuning::default()
        });
        let assignment = assigner.assign(&[], &agents, &remaining);
        assert_eq!(assignment.keys().copied().collect::<Vec<_>>(), agents);
        assert!(is_empty(&assignment));
    }
}
