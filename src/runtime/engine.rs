//! Transformation engine: per-agent state plus the chained stage pipeline

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::domain::{DerivedEvent, RawEvent};

use super::{assembler, projector, turn, AgentProcessingState, PipelineEvent, StageContext};

/// Drives raw events through the stage chain, one isolated state per agent
///
/// Processing for a single agent id is serialized behind that agent's mutex;
/// different agents never contend with each other. Derived events for one
/// agent therefore come out in the same relative order their raw events went
/// in.
#[derive(Default)]
pub struct TransformEngine {
    states: RwLock<HashMap<String, Arc<Mutex<AgentProcessingState>>>>,
}

impl TransformEngine {
    /// Create an engine with no agent state
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform one raw event into its derived events
    ///
    /// Runs the stage chain (assembler, projector, turn tracker); each stage
    /// also sees the events emitted by the stages before it. A failing stage
    /// is logged and skipped for this call (its state section stays at the
    /// pre-failure value and it contributes no events) while the remaining
    /// stages still run.
    pub async fn process(&self, agent_id: &str, raw: RawEvent) -> Vec<DerivedEvent> {
        let cell = self.state_cell(agent_id).await;
        let mut state = cell.lock().await;

        state.events_processed += 1;
        let cause_event_id = format!("evt-{}-{}", agent_id, state.events_processed);
        let ctx = StageContext {
            agent_id,
            cause_event_id: &cause_event_id,
            timestamp: raw.timestamp,
        };

        let mut inputs = vec![PipelineEvent::Raw(raw)];
        let mut collected = Vec::new();

        match assembler::apply(&ctx, &state.assembler, &inputs) {
            Ok((section, events)) => {
                state.assembler = section;
                chain(&mut inputs, &mut collected, events);
            }
            Err(e) => warn!(agent_id, stage = "assembler", error = %e, "stage failed, output skipped"),
        }

        match projector::apply(&ctx, &state.projector, &inputs) {
            Ok((section, events)) => {
                state.projector = section;
                chain(&mut inputs, &mut collected, events);
            }
            Err(e) => warn!(agent_id, stage = "projector", error = %e, "stage failed, output skipped"),
        }

        match turn::apply(&ctx, &state.turn, &inputs) {
            Ok((section, events)) => {
                state.turn = section;
                chain(&mut inputs, &mut collected, events);
            }
            Err(e) => warn!(agent_id, stage = "turn_tracker", error = %e, "stage failed, output skipped"),
        }

        collected
    }

    /// Drop an agent's processing state
    ///
    /// Returns whether the agent existed. A later event for the same id
    /// starts from a fresh state.
    pub async fn dispose(&self, agent_id: &str) -> bool {
        self.states.write().await.remove(agent_id).is_some()
    }

    /// Number of agents currently holding state
    pub async fn agent_count(&self) -> usize {
        self.states.read().await.len()
    }

    /// Snapshot of one agent's processing state, if present
    pub async fn state_snapshot(&self, agent_id: &str) -> Option<AgentProcessingState> {
        let cell = {
            let states = self.states.read().await;
            states.get(agent_id).cloned()
        };
        match cell {
            Some(cell) => Some(cell.lock().await.clone()),
            None => None,
        }
    }

    async fn state_cell(&self, agent_id: &str) -> Arc<Mutex<AgentProcessingState>> {
        {
            let states = self.states.read().await;
            if let Some(cell) = states.get(agent_id) {
                return cell.clone();
            }
        }
        let mut states = self.states.write().await;
        states
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AgentProcessingState::default())))
            .clone()
    }
}

fn chain(
    inputs: &mut Vec<PipelineEvent>,
    collected: &mut Vec<DerivedEvent>,
    events: Vec<DerivedEvent>,
) {
    inputs.extend(events.iter().cloned().map(PipelineEvent::Derived));
    collected.extend(events);
}
