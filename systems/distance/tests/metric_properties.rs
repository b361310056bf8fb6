use fire_rescue_core::{Edge, EdgeKey, Graph, Vertex, VertexId, VertexKind};
use fire_rescue_system_distance::{all_pairs, single_source, UNLOADED};

fn v(id: u32) -> VertexId {
    VertexId::new(id)
}

/// 3x3 lattice of rooms with uneven edge lengths and an exit hanging off
/// the top-left corner.
fn lattice() -> Graph {
    let mut vertices = vec![Vertex::new(v(100), VertexKind::Exit)];
    vertices.extend((0..9).map(|id| Vertex::new(v(id), VertexKind::Room)));

    let mut edges = vec![Edge::new(v(100), v(0))];
    for row in 0..3 {
        for column in 0..3 {
            let id = row * 3 + column;
            if column < 2 {
                let length = f64::from(1 + (id % 3));
                edges.push(Edge::new(v(id), v(id + 1)).with_length(length));
            }
            if row < 2 {
                let length = f64::from(1 + ((id + 1) % 2));
                edges.push(Edge::new(v(id), v(id + 3)).with_length(length));
            }
        }
    }
    Graph::new(vertices, edges).expect("lattice is valid")
}

fn all_vertices(graph: &Graph) -> Vec<VertexId> {
    graph.vertices().map(|vertex| vertex.id()).collect()
}

#[test]
fn distances_are_symmetric_and_zero_on_the_diagonal() {
    let graph = lattice();
    let vertices = all_vertices(&graph);
    let table = all_pairs(&graph, vertices.iter().copied(), UNLOADED);

    for &a in &vertices {
        assert_eq!(table.distance(a, a), Some(0.0));
        for &b in &vertices {
            let forward = table.distance(a, b).expect("lattice is connected");
            let backward = table.distance(b, a).expect("lattice is connected");
            assert!(
                (forward - backward).abs() < 1e-9,
                "asymmetric distance between {a:?} and {b:?}"
            );
        }
    }
}

#[test]
fn triangle_inequality_holds_under_any_load() {
    let mut graph = lattice();
    let _ = graph.burn(EdgeKey::new(v(4), v(5)));
    let vertices = all_vertices(&graph);

    for load in [1.0, 2.0, 3.5] {
        let table = all_pairs(&graph, vertices.iter().copied(), load);
        for &a in &vertices {
            for &b in &vertices {
                for &c in &vertices {
                    let (Some(ab), Some(bc), Some(ac)) = (
                        table.distance(a, b),
                        table.distance(b, c),
                        table.distance(a, c),
                    ) else {
                        continue;
                    };
                    assert!(
                        ac <= ab + bc + 1e-9,
                        "triangle violated for {a:?} {b:?} {c:?}"
                    );
                }
            }
        }
    }
}

#[test]
fn paths_are_walkable_and_match_their_cost() {
    let graph = lattice();
    let paths = single_source(&graph, v(100), 2.0);

    for entry in paths.values() {
        let mut cost = 0.0;
        for pair in entry.path.windows(2) {
            let length = graph
                .traversable_neighbors(pair[0])
                .filter(|(neighbor, _)| *neighbor == pair[1])
                .map(|(_, length)| length)
                .fold(f64::INFINITY, f64::min);
            assert!(length.is_finite(), "path uses a missing edge");
            cost += length * 2.0;
        }
        assert!((cost - entry.distance).abs() < 1e-9);
    }
}
