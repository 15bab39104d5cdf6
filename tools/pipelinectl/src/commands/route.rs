use analytics_core::topology::{PipelineEvent, PipelineState, Topology, Trigger};
use analytics_core::EnvironmentConfig;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

/// Evaluates every event in the file, starting from an idle pipeline.
pub fn evaluate(topology: &Topology, payload: &serde_json::Value) -> Result<Vec<(PipelineEvent, Trigger, PipelineState)>> {
    let events = PipelineEvent::parse(payload)?;
    let mut state = PipelineState::Idle;
    let mut steps = Vec::with_capacity(events.len());

    for event in events {
        let trigger = topology.evaluate(&event);
        state = state.advance(&trigger);
        steps.push((event, trigger, state));
    }
    Ok(steps)
}

pub fn execute(config: &EnvironmentConfig, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let payload = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let topology = Topology::from_config(config);
    for (event, trigger, state) in evaluate(&topology, &payload)? {
        let trigger_text = serde_json::to_string(&trigger)?;
        let colored_trigger = match trigger {
            Trigger::None => trigger_text.bright_yellow(),
            _ => trigger_text.bright_green(),
        };
        println!("Event:   {}", serde_json::to_string(&event)?);
        println!("Trigger: {}", colored_trigger);
        println!("State:   {:?}\n", state);
    }
    Ok(())
}
