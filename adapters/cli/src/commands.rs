//! `run` and `plan` subcommands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use fire_rescue_core::{ActionBudget, ActionStatus, Environment, Phase, RouteItem};
use fire_rescue_system_assignment::AssignerKind;
use fire_rescue_system_orchestrator::{plan_rescue, PhaseOrchestrator, PlannerTuning};
use fire_rescue_world::{query, World};
use serde::Serialize;
use tracing::{info, warn};

use crate::scenario::ScenarioFile;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Strategy {
    /// Highest value density first
    Greedy,
    /// Relaxed linear program, rounded
    Lp,
}

impl From<Strategy> for AssignerKind {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Greedy => Self::Greedy,
            Strategy::Lp => Self::Lp,
        }
    }
}

/// Explore and rescue until everyone discovered is out.
#[derive(Debug, Args)]
pub(crate) struct RunCommand {
    /// Scenario TOML file; the built-in demo is used when omitted
    #[arg(short, long, value_name = "FILE")]
    scenario: Option<PathBuf>,

    /// Seed for occupant sampling
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Assignment strategy, overrides the scenario's planner table
    #[arg(long, value_enum)]
    assigner: Option<Strategy>,

    /// Stop after this many ticks
    #[arg(long, default_value_t = 500)]
    max_ticks: u64,

    /// Quiet ticks before exploration gives up on unreachable rooms
    #[arg(long)]
    stall_window: Option<u64>,

    /// Actions per agent per tick
    #[arg(long)]
    action_budget: Option<u32>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

/// Outcome of a full run.
#[derive(Debug, Serialize)]
struct RunSummary {
    scenario: String,
    seed: u64,
    ticks: u64,
    finished: bool,
    phase: Phase,
    switched_at: Option<u64>,
    evacuated: u32,
    rescued: u32,
    left_inside: u32,
    rejected_actions: usize,
    burned_edges: Vec<[u32; 2]>,
}

impl RunCommand {
    pub(crate) fn execute(self) -> Result<()> {
        let file = ScenarioFile::load(self.scenario.as_deref())?;
        let tuning = self.tuning(file.planner.clone());
        let mut world = World::from_config(&file.scenario, self.seed)
            .context("failed to build the world")?
            .with_budget(tuning.action_budget);
        let mut orchestrator =
            PhaseOrchestrator::new(tuning).with_fire_origin(query::fire_origin(&world));
        info!(scenario = file.name(), seed = self.seed, "run started");

        let mut rejected = 0;
        let mut finished = false;
        while query::tick(&world) < self.max_ticks {
            let snapshot = world.read();
            if orchestrator.is_finished(&snapshot) {
                finished = true;
                break;
            }
            let actions = orchestrator.tick(&snapshot);
            let result = world.apply(&actions);
            for outcome in &result.outcomes {
                if let ActionStatus::Rejected(reason) = outcome.status {
                    rejected += 1;
                    warn!(
                        tick = result.tick,
                        agent = outcome.agent.get(),
                        action = ?outcome.action,
                        ?reason,
                        "action rejected"
                    );
                }
            }
        }
        if !finished {
            warn!(
                max_ticks = self.max_ticks,
                "tick cap reached before the rescue finished"
            );
        }

        let tally = query::tally(&world);
        let left = query::remaining(&world);
        let summary = RunSummary {
            scenario: file.name().to_owned(),
            seed: self.seed,
            ticks: query::tick(&world),
            finished,
            phase: orchestrator.phase(),
            switched_at: orchestrator.switched_at(),
            evacuated: tally.evacuated,
            rescued: tally.rescued,
            left_inside: left.capable + left.incapable + left.instructed,
            rejected_actions: rejected,
            burned_edges: query::burned_edges(&world)
                .into_iter()
                .map(|edge| [edge.low().get(), edge.high().get()])
                .collect(),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }
        Ok(())
    }

    fn tuning(&self, mut tuning: PlannerTuning) -> PlannerTuning {
        if let Some(strategy) = self.assigner {
            tuning.assigner.strategy = strategy.into();
        }
        if let Some(window) = self.stall_window {
            tuning.exploration.stall_window = window;
        }
        if let Some(limit) = self.action_budget {
            tuning.action_budget = ActionBudget::new(limit);
        }
        tuning
    }
}

fn print_summary(summary: &RunSummary) {
    println!("scenario      {} (seed {})", summary.scenario, summary.seed);
    println!("ticks         {}", summary.ticks);
    if !summary.finished {
        println!("              tick cap reached before the rescue finished");
    }
    match summary.switched_at {
        Some(tick) => println!("rescue phase  from tick {tick}"),
        None => println!("rescue phase  never started"),
    }
    println!("evacuated     {}", summary.evacuated);
    println!("rescued       {}", summary.rescued);
    println!("left inside   {}", summary.left_inside);
    if summary.rejected_actions > 0 {
        println!("rejected      {}", summary.rejected_actions);
    }
    let burned: Vec<String> = summary
        .burned_edges
        .iter()
        .map(|[a, b]| format!("{a}-{b}"))
        .collect();
    println!(
        "burned        {}",
        if burned.is_empty() {
            "none".to_owned()
        } else {
            burned.join(", ")
        }
    );
}

/// Plan the rescue as if every occupant were already discovered.
#[derive(Debug, Args)]
pub(crate) struct PlanCommand {
    /// Scenario TOML file; the built-in demo is used when omitted
    #[arg(short, long, value_name = "FILE")]
    scenario: Option<PathBuf>,

    /// Seed for occupant sampling
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Assignment strategy, overrides the scenario's planner table
    #[arg(long, value_enum)]
    assigner: Option<Strategy>,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct ItemView {
    rooms: Vec<[u32; 2]>,
    entry: u32,
    drop: u32,
    path: Vec<u32>,
    time: f64,
    value: f64,
}

impl From<&RouteItem> for ItemView {
    fn from(item: &RouteItem) -> Self {
        Self {
            rooms: item
                .visiting_order()
                .iter()
                .map(|room| [room.get(), item.count_for(*room)])
                .collect(),
            entry: item.entry_exit().get(),
            drop: item.drop_exit().get(),
            path: item.path().iter().map(|vertex| vertex.get()).collect(),
            time: item.time(),
            value: item.value(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PlanView {
    scenario: String,
    demand: Vec<[u32; 2]>,
    items: Vec<ItemView>,
    assignment: Vec<(u32, Vec<ItemView>)>,
}

impl PlanCommand {
    pub(crate) fn execute(self) -> Result<()> {
        let file = ScenarioFile::load(self.scenario.as_deref())?;
        let mut tuning = file.planner.clone();
        if let Some(strategy) = self.assigner {
            tuning.assigner.strategy = strategy.into();
        }
        let world = World::from_config(&file.scenario, self.seed)
            .context("failed to build the world")?;

        let mut snapshot = world.read();
        snapshot.occupants = query::occupants(&world).clone();

        let Some(plan) = plan_rescue(&snapshot, &tuning, query::fire_origin(&world)) else {
            println!("nothing to plan: no reachable incapacitated occupants");
            return Ok(());
        };
        info!(
            combinations = plan.stats.combinations,
            permutations = plan.stats.permutations,
            scored = plan.stats.scored,
            pruned = plan.stats.pruned,
            "route items generated"
        );

        let view = PlanView {
            scenario: file.name().to_owned(),
            demand: plan
                .demand
                .iter()
                .map(|(room, count)| [room.get(), *count])
                .collect(),
            items: plan.items.iter().map(ItemView::from).collect(),
            assignment: plan
                .assignment
                .iter()
                .map(|(agent, items)| (agent.get(), items.iter().map(ItemView::from).collect()))
                .collect(),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&view)?);
            return Ok(());
        }

        println!("scenario {} (seed {})", view.scenario, self.seed);
        println!("{} items", view.items.len());
        for item in &view.items {
            println!("  {}", describe(item));
        }
        for (agent, items) in &view.assignment {
            println!("agent {agent}");
            for item in items {
                println!("  {}", describe(item));
            }
        }
        Ok(())
    }
}

fn describe(item: &ItemView) -> String {
    let rooms: Vec<String> = item
        .rooms
        .iter()
        .map(|[room, count]| format!("{room}x{count}"))
        .collect();
    format!(
        "[{}] {} -> {} time {:.1} value {:.4}",
        rooms.join(" "),
        item.entry,
        item.drop,
        item.time,
        item.value
    )
}
