//! Per-agent processing state

use super::{AssemblerState, ProjectorState, TurnState};

/// Mutable per-agent state owned exclusively by the transformation engine
///
/// One section per stage; the engine commits a section only when its stage
/// succeeds, so a failing stage never corrupts the others. Created lazily on
/// the first raw event for an agent id, dropped when the agent is disposed.
#[derive(Debug, Clone, Default)]
pub struct AgentProcessingState {
    /// Monotonic count of raw events processed, used to derive deterministic
    /// cause/message/turn identifiers
    pub(crate) events_processed: u64,
    pub(crate) assembler: AssemblerState,
    pub(crate) projector: ProjectorState,
    pub(crate) turn: TurnState,
}

impl AgentProcessingState {
    /// Number of raw events this agent has processed
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }
}
