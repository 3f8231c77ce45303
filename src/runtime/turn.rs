//! Turn tracker stage
//!
//! Accumulates token usage, tool-call records, and errors across a turn, and
//! emits one `TurnEvent` when the turn-boundary raw event (`message_stop`)
//! arrives. Tool calls are taken from the message events the assembler emits
//! earlier in the same chain, so the tracker sees fully coerced arguments
//! rather than raw fragments. The boundary resets turn-scoped counters only,
//! never the rest of the agent state.

use crate::domain::{ContentPart, DerivedEvent, RawPayload, Role, ToolCallRecord, TurnEvent};

use super::{PipelineEvent, StageContext, StageError};

const STAGE: &str = "turn_tracker";

/// One turn may not accumulate more tool calls than this; hitting the limit
/// fails the stage rather than growing the record without bound.
pub(crate) const MAX_TOOL_CALLS_PER_TURN: usize = 256;

/// Turn-tracker section of the agent state
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    turns_emitted: u64,
    active_turn: Option<String>,
    started_at: Option<i64>,
    input_tokens: u64,
    output_tokens: u64,
    tool_calls: Vec<ToolCallRecord>,
    errors: Vec<String>,
    last_assistant_message_id: Option<String>,
}

impl TurnState {
    /// Whether a turn is currently open
    pub fn in_turn(&self) -> bool {
        self.active_turn.is_some()
    }

    /// Identifier of the turn in progress, if any
    pub fn active_turn(&self) -> Option<&str> {
        self.active_turn.as_deref()
    }

    fn open_turn(&mut self, ctx: &StageContext<'_>, timestamp: i64) {
        if self.active_turn.is_none() {
            self.active_turn = Some(format!("turn-{}-{}", ctx.agent_id, self.turns_emitted + 1));
            self.started_at = Some(timestamp);
        }
    }

    fn absorb_message(&mut self, event: &DerivedEvent) -> Result<(), StageError> {
        let DerivedEvent::Message(message) = event else {
            return Ok(());
        };
        if message.role == Role::Assistant {
            self.last_assistant_message_id = Some(message.message_id.clone());
        }
        for part in &message.content {
            match part {
                ContentPart::ToolInvocation {
                    id,
                    name,
                    arguments,
                } => {
                    if self.tool_calls.len() >= MAX_TOOL_CALLS_PER_TURN {
                        return Err(StageError::LimitExceeded {
                            stage: STAGE,
                            detail: format!(
                                "more than {} tool calls in one turn",
                                MAX_TOOL_CALLS_PER_TURN
                            ),
                        });
                    }
                    self.tool_calls.push(ToolCallRecord::pending(
                        id.clone(),
                        name.clone(),
                        arguments.clone(),
                    ));
                }
                ContentPart::ToolResult {
                    tool_call_id,
                    payload,
                    is_error,
                } => {
                    if let Some(record) =
                        self.tool_calls.iter_mut().find(|r| &r.id == tool_call_id)
                    {
                        record.complete(payload.clone(), *is_error);
                    }
                }
                ContentPart::Text { .. } | ContentPart::Binary { .. } => {}
            }
        }
        Ok(())
    }

    fn close_turn(&mut self, ctx: &StageContext<'_>) -> TurnEvent {
        self.turns_emitted += 1;
        let turn_id = self
            .active_turn
            .take()
            .unwrap_or_else(|| format!("turn-{}-{}", ctx.agent_id, self.turns_emitted));
        let started_at = self.started_at.take().unwrap_or(ctx.timestamp);
        let duration_ms = ctx.timestamp.saturating_sub(started_at).max(0) as u64;

        let errors = std::mem::take(&mut self.errors);
        TurnEvent {
            agent_id: ctx.agent_id.to_string(),
            turn_id,
            message_id: self.last_assistant_message_id.take(),
            input_tokens: std::mem::take(&mut self.input_tokens),
            output_tokens: std::mem::take(&mut self.output_tokens),
            duration_ms,
            tool_calls: std::mem::take(&mut self.tool_calls),
            errors: if errors.is_empty() { None } else { Some(errors) },
        }
    }
}

/// Mealy step for the turn tracker stage
pub(crate) fn apply(
    ctx: &StageContext<'_>,
    section: &TurnState,
    inputs: &[PipelineEvent],
) -> Result<(TurnState, Vec<DerivedEvent>), StageError> {
    let mut next = section.clone();
    let mut out = Vec::new();

    // Absorb the chain's derived events first: they are co-products of the
    // same raw event, so a message flushed by the turn boundary still belongs
    // to the turn being closed.
    for input in inputs {
        if let PipelineEvent::Derived(event) = input {
            next.absorb_message(event)?;
        }
    }

    for input in inputs {
        let PipelineEvent::Raw(raw) = input else {
            continue;
        };
        next.open_turn(ctx, raw.timestamp);
        match &raw.payload {
            RawPayload::MessageStart { input_tokens, .. } => {
                next.input_tokens += input_tokens;
            }
            RawPayload::MessageDelta { output_tokens, .. } => {
                next.output_tokens += output_tokens;
            }
            RawPayload::Error { message, .. } => {
                next.errors.push(message.clone());
            }
            RawPayload::MessageStop { .. } => {
                out.push(DerivedEvent::Turn(next.close_turn(ctx)));
            }
            _ => {}
        }
    }

    Ok((next, out))
}
