// Scaling module - Rule-driven instance count convergence

mod rank;

pub use rank::{load_score, rank_by_load};

use crate::error::Result;
use crate::process::{ProcessId, ProcessRecord, ScalingRule, Supervisor};
use crate::state::ProcessFilter;
use tracing::{debug, error, info};

/// What one rule asks for in the current tick
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingDecision {
    /// Start one more instance running `command`
    ScaleUp { command: String },
    /// Stop the given instance
    ScaleDown { victim: ProcessId },
}

/// A decision applied to a named group
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingAction {
    pub process_name: String,
    pub decision: ScalingDecision,
}

/// Decide how one rule moves the running group `running` (store order).
///
/// Returns `None` for an empty group: the engine never creates the first
/// instance of a name.
pub fn decide(rule: &ScalingRule, running: &[ProcessRecord]) -> Option<ScalingDecision> {
    let first = running.first()?;
    let count = running.len();

    let avg_cpu = average(running.iter().map(|r| r.cpu))?;
    let avg_memory = average(running.iter().map(|r| r.memory))?;

    let overloaded = avg_cpu > rule.cpu_threshold || avg_memory > rule.memory_threshold;

    if overloaded && count < rule.max_instances as usize {
        Some(ScalingDecision::ScaleUp {
            command: first.command.clone(),
        })
    } else if !overloaded && count > rule.min_instances as usize {
        running.last().map(|victim| ScalingDecision::ScaleDown { victim: victim.id })
    } else {
        None
    }
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Applies every scaling rule once per tick through the supervisor
#[derive(Debug, Default)]
pub struct ScalingEngine;

impl ScalingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate all rules in creation order, at most one action per rule.
    /// A failing rule is logged and does not stop the others.
    pub async fn evaluate(&self, supervisor: &Supervisor) -> Vec<ScalingAction> {
        let rules = match supervisor.scaling_rules() {
            Ok(rules) => rules,
            Err(e) => {
                error!("Failed to load scaling rules: {}", e);
                return Vec::new();
            }
        };

        let mut actions = Vec::new();

        for rule in rules {
            match self.apply_rule(supervisor, &rule).await {
                Ok(Some(action)) => actions.push(action),
                Ok(None) => {}
                Err(e) => error!(
                    "Error applying scaling rule for {}: {}",
                    rule.process_name, e
                ),
            }
        }

        actions
    }

    async fn apply_rule(
        &self,
        supervisor: &Supervisor,
        rule: &ScalingRule,
    ) -> Result<Option<ScalingAction>> {
        let running = supervisor.find_by(&ProcessFilter::running().named(&rule.process_name))?;

        let Some(decision) = decide(rule, &running) else {
            debug!(
                "No scaling needed for {} ({} running)",
                rule.process_name,
                running.len()
            );
            return Ok(None);
        };

        match &decision {
            ScalingDecision::ScaleUp { command } => {
                info!(
                    "Scaling up {}: {} -> {} instances",
                    rule.process_name,
                    running.len(),
                    running.len() + 1
                );
                supervisor.spawn_instance(&rule.process_name, command).await?;
            }
            ScalingDecision::ScaleDown { victim } => {
                info!(
                    "Scaling down {}: {} -> {} instances",
                    rule.process_name,
                    running.len(),
                    running.len() - 1
                );
                supervisor.stop(*victim).await?;
            }
        }

        Ok(Some(ScalingAction {
            process_name: rule.process_name.clone(),
            decision,
        }))
    }
}
