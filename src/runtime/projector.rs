//! State projector stage
//!
//! Maps the eleven raw event kinds onto the six coarse agent phases and emits
//! a `StateEvent` on every transition. Self-transitions are suppressed so a
//! long run of text deltas produces one `responding` event, not thousands.

use crate::domain::{AgentPhase, DerivedEvent, RawPayload, StateEvent};

use super::{PipelineEvent, StageContext, StageError};

/// Projector section of the agent state
#[derive(Debug, Clone)]
pub struct ProjectorState {
    phase: AgentPhase,
}

impl Default for ProjectorState {
    fn default() -> Self {
        Self {
            phase: AgentPhase::Idle,
        }
    }
}

impl ProjectorState {
    /// Current coarse phase
    pub fn phase(&self) -> AgentPhase {
        self.phase
    }
}

/// Fixed projection table from raw event kind to coarse phase
fn target_phase(payload: &RawPayload) -> AgentPhase {
    match payload {
        RawPayload::MessageStart { .. } => AgentPhase::Thinking,
        RawPayload::MessageDelta { .. }
        | RawPayload::TextBlockStart
        | RawPayload::TextDelta { .. }
        | RawPayload::TextBlockStop => AgentPhase::Responding,
        RawPayload::ToolUseStart { .. } | RawPayload::InputJsonDelta { .. } => {
            AgentPhase::PlanningTool
        }
        RawPayload::ToolUseStop { .. } => AgentPhase::AwaitingToolResult,
        RawPayload::ToolResult { .. } => AgentPhase::Thinking,
        RawPayload::MessageStop { .. } => AgentPhase::Idle,
        RawPayload::Error { .. } => AgentPhase::Error,
    }
}

/// Mealy step for the projector stage
pub(crate) fn apply(
    ctx: &StageContext<'_>,
    section: &ProjectorState,
    inputs: &[PipelineEvent],
) -> Result<(ProjectorState, Vec<DerivedEvent>), StageError> {
    let mut next = section.clone();
    let mut out = Vec::new();

    for input in inputs {
        let PipelineEvent::Raw(raw) = input else {
            continue;
        };
        let target = target_phase(&raw.payload);
        if target != next.phase {
            next.phase = target;
            out.push(DerivedEvent::State(StateEvent {
                agent_id: ctx.agent_id.to_string(),
                state: target,
                timestamp: ctx.timestamp,
                cause_event_id: ctx.cause_event_id.to_string(),
            }));
        }
    }

    Ok((next, out))
}
