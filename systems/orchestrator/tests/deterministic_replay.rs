use std::collections::BTreeSet;

use fire_rescue_core::{
    ActionStatus, AgentActions, Environment, OccupantCounts, Phase, RejectReason, VertexId,
};
use fire_rescue_system_assignment::AssignerKind;
use fire_rescue_system_exploration::ExplorationStatus;
use fire_rescue_system_orchestrator::{PhaseOrchestrator, PlannerTuning};
use fire_rescue_world::{query, ScenarioConfig, World};

const MAX_TICKS: u64 = 200;
const OVER_BUDGET: ActionStatus = ActionStatus::Rejected(RejectReason::BudgetExceeded);

/// Two exits joined by a three vertex corridor with rooms hanging off it.
const OFFICE: &str = r#"
name = "office"
fire_origin = 2

vertices = [
    { id = 0, kind = "exit" },
    { id = 9, kind = "exit" },
    { id = 1, kind = "corridor" },
    { id = 2, kind = "corridor" },
    { id = 3, kind = "corridor" },
    { id = 4, kind = "room" },
    { id = 5, kind = "room", priority = 2.0 },
    { id = 6, kind = "room" },
    { id = 7, kind = "room" },
    { id = 8, kind = "room", priority = 1.5 },
]

edges = [
    { between = [0, 1] },
    { between = [1, 2], length = 2.0 },
    { between = [2, 3], length = 2.0 },
    { between = [3, 9] },
    { between = [1, 4] },
    { between = [1, 5] },
    { between = [2, 6] },
    { between = [3, 7] },
    { between = [3, 8] },
]

occupants = [
    { vertex = 4, capable = [0, 2], incapable = [1, 2] },
    { vertex = 5, incapable = [1, 3] },
    { vertex = 6, capable = [1, 1], incapable = [0, 1] },
    { vertex = 7, incapable = [1, 1] },
    { vertex = 8, capable = [0, 1], incapable = [0, 2] },
]

agents = [{ start = 0 }, { start = 9 }]
"#;

/// One agent, a capable occupant next to an incapacitated one, and a far
/// room that is cut off before the agent gets there.
const CUT_OFF: &str = r#"
vertices = [
    { id = 0, kind = "exit" },
    { id = 1, kind = "corridor" },
    { id = 2, kind = "room" },
    { id = 3, kind = "room" },
    { id = 4, kind = "room" },
    { id = 5, kind = "room" },
]

edges = [
    { between = [0, 1] },
    { between = [1, 2] },
    { between = [1, 3] },
    { between = [1, 4], length = 5.0 },
    { between = [4, 5] },
]

occupants = [
    { vertex = 2, incapable = [1, 1] },
    { vertex = 3, capable = [1, 1] },
    { vertex = 5, incapable = [1, 1] },
]

agents = [{ start = 0 }]
burns = [{ tick = 2, edge = [4, 5] }]
"#;

struct Run {
    log: Vec<AgentActions>,
    world: World,
    orchestrator: PhaseOrchestrator,
    finished: bool,
}

fn total(counts: OccupantCounts) -> u32 {
    counts.capable + counts.incapable + counts.instructed
}

fn run(scenario: &str, seed: u64, tuning: PlannerTuning) -> Run {
    let config = ScenarioConfig::from_toml_str(scenario).expect("scenario parses");
    let mut world = World::from_config(&config, seed)
        .expect("world builds")
        .with_budget(tuning.action_budget);
    let mut orchestrator =
        PhaseOrchestrator::new(tuning).with_fire_origin(query::fire_origin(&world));

    let start = query::remaining(&world);
    let mut log = Vec::new();
    let mut finished = false;
    while query::tick(&world) < MAX_TICKS {
        let snapshot = world.read();
        if orchestrator.is_finished(&snapshot) {
            finished = true;
            break;
        }
        let actions = orchestrator.tick(&snapshot);
        let result = world.apply(&actions);
        let over_budget = result
            .outcomes
            .iter()
            .any(|outcome| outcome.status == OVER_BUDGET);
        assert!(
            !over_budget,
            "tick {} exceeded the action budget",
            result.tick
        );

        let tally = query::tally(&world);
        let left = query::remaining(&world);
        assert_eq!(
            left.incapable + query::carried(&world) + tally.rescued,
            start.incapable,
            "incapacitated occupants not conserved at tick {}",
            result.tick
        );
        assert_eq!(
            total(left) - left.incapable + tally.evacuated,
            start.capable + start.instructed,
            "self-capable occupants not conserved at tick {}",
            result.tick
        );
        log.push(actions);
    }

    Run {
        log,
        world,
        orchestrator,
        finished,
    }
}

#[test]
fn replay_is_deterministic_and_within_budget() {
    let first = run(OFFICE, 11, PlannerTuning::default());
    let second = run(OFFICE, 11, PlannerTuning::default());

    assert_eq!(first.log, second.log, "replay diverged between runs");
    assert_eq!(query::tally(&first.world), query::tally(&second.world));

    let budget = PlannerTuning::default().action_budget.limit();
    for batch in &first.log {
        for actions in batch.values() {
            assert!(actions.len() <= budget);
        }
    }

    assert!(
        first.finished,
        "planner did not finish in {MAX_TICKS} ticks"
    );
    assert_eq!(first.orchestrator.phase(), Phase::OptimizedRescue);
    assert!(first.orchestrator.switched_at().is_some());

    let left = query::remaining(&first.world);
    assert_eq!(
        left.capable + left.instructed,
        0,
        "everyone able to walk got out"
    );
    assert!(query::tally(&first.world).rescued > 0);
    assert_eq!(query::carried(&first.world), 0);
}

#[test]
fn lp_assignment_replays_identically() {
    let mut tuning = PlannerTuning::default();
    tuning.assigner.strategy = AssignerKind::Lp;

    let first = run(OFFICE, 5, tuning.clone());
    let second = run(OFFICE, 5, tuning);
    assert_eq!(first.log, second.log);
    assert!(first.finished);
    assert!(query::tally(&first.world).rescued > 0);
}

#[test]
fn burned_edge_forces_replan_stall_and_transition() {
    let mut tuning = PlannerTuning::default();
    tuning.exploration.stall_window = 3;
    let outcome = run(CUT_OFF, 0, tuning);

    let exploration = outcome.orchestrator.exploration();
    assert_eq!(exploration.replans(), 2);
    assert_eq!(
        exploration.status(),
        &ExplorationStatus::Stalled {
            unreachable: BTreeSet::from([VertexId::new(5)]),
        }
    );
    assert!(exploration.status().is_finished());

    assert!(outcome.finished);
    assert!(outcome.orchestrator.switched_at().is_some());
    let plan = outcome.orchestrator.rescue_plan().expect("plan was built");
    assert!(!plan.demand.contains_key(&VertexId::new(5)));

    let tally = query::tally(&outcome.world);
    assert_eq!(tally.evacuated, 1);
    assert_eq!(tally.rescued, 1);
    assert_eq!(query::remaining(&outcome.world).incapable, 1);
}
