//! Event transformation runtime
//!
//! A Mealy-style pipeline: each raw event from the inference engine passes
//! through three chained stages (message assembly, state projection, turn
//! tracking). A stage consumes the raw event plus everything emitted by the
//! stages before it, and returns a new copy of its own state section together
//! with the events it emits. The engine owns one isolated state value per
//! agent and serializes processing per agent id.

mod assembler;
mod engine;
mod error;
mod projector;
mod state;
mod turn;

pub use assembler::AssemblerState;
pub use engine::TransformEngine;
pub use error::StageError;
pub use projector::ProjectorState;
pub use state::AgentProcessingState;
pub use turn::TurnState;

use crate::domain::{DerivedEvent, RawEvent};

/// Per-call context handed to every stage
#[derive(Debug, Clone, Copy)]
pub(crate) struct StageContext<'a> {
    /// Agent whose state is being driven
    pub agent_id: &'a str,
    /// Identifier of the causing raw event, for state-event attribution
    pub cause_event_id: &'a str,
    /// Timestamp of the causing raw event; derived events reuse it so a
    /// replayed input sequence yields an identical output sequence
    pub timestamp: i64,
}

/// An input to a pipeline stage: the original raw event or an event emitted
/// by an earlier stage in the same call
#[derive(Debug, Clone)]
pub(crate) enum PipelineEvent {
    Raw(RawEvent),
    Derived(DerivedEvent),
}
