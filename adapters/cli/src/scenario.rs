//! Scenario file loading.
//!
//! A scenario file is a world description with an optional `[planner]`
//! table holding tuning overrides. Without a file the built-in demo is used.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use fire_rescue_system_orchestrator::PlannerTuning;
use fire_rescue_world::ScenarioConfig;
use serde::Deserialize;

const DEMO: &str = include_str!("../scenarios/demo.toml");

/// Parsed scenario file.
#[derive(Debug, Deserialize)]
pub(crate) struct ScenarioFile {
    #[serde(flatten)]
    pub(crate) scenario: ScenarioConfig,
    #[serde(default)]
    pub(crate) planner: PlannerTuning,
}

impl ScenarioFile {
    /// Reads `path`, or the built-in demo when no path is given.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read scenario {}", path.display()))?;
                Self::parse(&text)
                    .with_context(|| format!("invalid scenario {}", path.display()))
            }
            None => Self::parse(DEMO).context("invalid built-in demo scenario"),
        }
    }

    fn parse(text: &str) -> Result<Self> {
        let file: Self = toml::from_str(text)?;
        let _ = file.scenario.build_graph()?;
        Ok(file)
    }

    /// Display name of the scenario.
    pub(crate) fn name(&self) -> &str {
        self.scenario.name.as_deref().unwrap_or("unnamed")
    }
}
