//! Message assembler stage
//!
//! Buffers streamed text deltas and accumulates partial tool-call arguments,
//! emitting a `MessageEvent` whenever a finalization boundary is reached.
//! Finalization policy: buffered text flushes on a `final`-flagged text delta,
//! on `message_stop`, and on a tool boundary (`tool_use_start`), in that case
//! before the tool call itself is assembled. Malformed or partial payloads are
//! coerced into valid content parts instead of failing the stage.

use serde_json::Value;

use crate::domain::{ContentPart, DerivedEvent, MessageEvent, RawPayload, Role};

use super::{PipelineEvent, StageContext, StageError};

const STAGE: &str = "assembler";

/// Pending text past this size means the producer never finalizes; the stage
/// refuses the delta rather than growing without bound.
pub(crate) const MAX_BUFFER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments_json: String,
}

/// Assembler section of the agent state
#[derive(Debug, Clone, Default)]
pub struct AssemblerState {
    buffer: String,
    pending_tool: Option<PendingToolCall>,
    messages_emitted: u64,
}

impl AssemblerState {
    /// Text currently buffered and not yet emitted
    pub fn buffered_text(&self) -> &str {
        &self.buffer
    }

    fn next_message_id(&mut self, agent_id: &str) -> String {
        self.messages_emitted += 1;
        format!("msg-{}-{}", agent_id, self.messages_emitted)
    }

    fn flush_text(&mut self, ctx: &StageContext<'_>, out: &mut Vec<DerivedEvent>) {
        if self.buffer.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.buffer);
        let message_id = self.next_message_id(ctx.agent_id);
        out.push(DerivedEvent::Message(MessageEvent {
            agent_id: ctx.agent_id.to_string(),
            message_id,
            role: Role::Assistant,
            content: vec![ContentPart::text(text)],
            timestamp: ctx.timestamp,
        }));
    }

    fn finish_tool_call(&mut self, ctx: &StageContext<'_>, out: &mut Vec<DerivedEvent>) {
        let Some(pending) = self.pending_tool.take() else {
            return;
        };
        // Partial or malformed argument JSON coerces to an empty object
        let arguments: Value = if pending.arguments_json.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&pending.arguments_json)
                .unwrap_or_else(|_| Value::Object(Default::default()))
        };
        let message_id = self.next_message_id(ctx.agent_id);
        out.push(DerivedEvent::Message(MessageEvent {
            agent_id: ctx.agent_id.to_string(),
            message_id,
            role: Role::Assistant,
            content: vec![ContentPart::tool_invocation(
                pending.id,
                pending.name,
                arguments,
            )],
            timestamp: ctx.timestamp,
        }));
    }
}

/// Mealy step for the assembler stage
pub(crate) fn apply(
    ctx: &StageContext<'_>,
    section: &AssemblerState,
    inputs: &[PipelineEvent],
) -> Result<(AssemblerState, Vec<DerivedEvent>), StageError> {
    let mut next = section.clone();
    let mut out = Vec::new();

    for input in inputs {
        // First stage in the chain: only raw events reach it
        let PipelineEvent::Raw(raw) = input else {
            continue;
        };

        match &raw.payload {
            RawPayload::TextDelta { text, is_final } => {
                if next.buffer.len() + text.len() > MAX_BUFFER_BYTES {
                    return Err(StageError::BufferOverflow {
                        stage: STAGE,
                        limit: MAX_BUFFER_BYTES,
                    });
                }
                next.buffer.push_str(text);
                if *is_final {
                    next.flush_text(ctx, &mut out);
                }
            }
            RawPayload::ToolUseStart {
                tool_call_id,
                tool_name,
            } => {
                // Tool boundary forces out any pending text first
                next.flush_text(ctx, &mut out);
                // An unterminated earlier tool call is emitted with whatever
                // arguments it accumulated
                next.finish_tool_call(ctx, &mut out);
                next.pending_tool = Some(PendingToolCall {
                    id: tool_call_id.clone(),
                    name: tool_name.clone(),
                    arguments_json: String::new(),
                });
            }
            RawPayload::InputJsonDelta { partial_json } => {
                if let Some(pending) = next.pending_tool.as_mut() {
                    if pending.arguments_json.len() + partial_json.len() > MAX_BUFFER_BYTES {
                        return Err(StageError::BufferOverflow {
                            stage: STAGE,
                            limit: MAX_BUFFER_BYTES,
                        });
                    }
                    pending.arguments_json.push_str(partial_json);
                }
                // A delta without a pending tool call is dropped
            }
            RawPayload::ToolUseStop { .. } => {
                next.finish_tool_call(ctx, &mut out);
            }
            RawPayload::ToolResult {
                tool_call_id,
                payload,
                is_error,
            } => {
                let message_id = next.next_message_id(ctx.agent_id);
                out.push(DerivedEvent::Message(MessageEvent {
                    agent_id: ctx.agent_id.to_string(),
                    message_id,
                    role: Role::Tool,
                    content: vec![ContentPart::tool_result(
                        tool_call_id.clone(),
                        payload.clone(),
                        *is_error,
                    )],
                    timestamp: ctx.timestamp,
                }));
            }
            RawPayload::MessageStop { .. } => {
                next.flush_text(ctx, &mut out);
                next.finish_tool_call(ctx, &mut out);
            }
            RawPayload::MessageStart { .. }
            | RawPayload::MessageDelta { .. }
            | RawPayload::TextBlockStart
            | RawPayload::TextBlockStop
            | RawPayload::Error { .. } => {}
        }
    }

    Ok((next, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawEvent;

    fn ctx<'a>(agent_id: &'a str, cause: &'a str) -> StageContext<'a> {
        StageContext {
            agent_id,
            cause_event_id: cause,
            timestamp: 1000,
        }
    }

    fn run(section: &AssemblerState, raw: RawEvent) -> (AssemblerState, Vec<DerivedEvent>) {
        apply(
            &ctx("a1", "evt-a1-1"),
            section,
            &[PipelineEvent::Raw(raw)],
        )
        .unwrap()
    }

    fn message_text(event: &DerivedEvent) -> String {
        match event {
            DerivedEvent::Message(m) => m
                .content
                .iter()
                .filter_map(ContentPart::as_text)
                .collect(),
            other => panic!("expected message event, got {:?}", other),
        }
    }

    #[test]
    fn buffers_until_final_flag() {
        let state = AssemblerState::default();
        let (state, events) = run(&state, RawEvent::text_delta(1, "Hello", false));
        assert!(events.is_empty());
        assert_eq!(state.buffered_text(), "Hello");

        let (state, events) = run(&state, RawEvent::text_delta(2, " world", true));
        assert_eq!(events.len(), 1);
        assert_eq!(message_text(&events[0]), "Hello world");
        assert_eq!(state.buffered_text(), "");
    }

    #[test]
    fn tool_boundary_flushes_pending_text() {
        let state = AssemblerState::default();
        let (state, _) = run(&state, RawEvent::text_delta(1, "thinking...", false));
        let (state, events) = run(
            &state,
            RawEvent::new(
                2,
                RawPayload::ToolUseStart {
                    tool_call_id: "call_1".into(),
                    tool_name: "search".into(),
                },
            ),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(message_text(&events[0]), "thinking...");
        assert!(state.pending_tool.is_some());
    }

    #[test]
    fn tool_call_arguments_accumulate_across_deltas() {
        let state = AssemblerState::default();
        let (state, _) = run(
            &state,
            RawEvent::new(
                1,
                RawPayload::ToolUseStart {
                    tool_call_id: "call_1".into(),
                    tool_name: "search".into(),
                },
            ),
        );
        let (state, _) = run(
            &state,
            RawEvent::new(
                2,
                RawPayload::InputJsonDelta {
                    partial_json: "{\"q\": \"ru".into(),
                },
            ),
        );
        let (state, _) = run(
            &state,
            RawEvent::new(
                3,
                RawPayload::InputJsonDelta {
                    partial_json: "st\"}".into(),
                },
            ),
        );
        let (_, events) = run(
            &state,
            RawEvent::new(
                4,
                RawPayload::ToolUseStop {
                    tool_call_id: "call_1".into(),
                },
            ),
        );
        assert_eq!(events.len(), 1);
        let DerivedEvent::Message(m) = &events[0] else {
            panic!()
        };
        let ContentPart::ToolInvocation { id, name, arguments } = &m.content[0] else {
            panic!("expected tool invocation part")
        };
        assert_eq!(id, "call_1");
        assert_eq!(name, "search");
        assert_eq!(arguments["q"], "rust");
    }

    #[test]
    fn malformed_tool_arguments_coerce_to_empty_object() {
        let state = AssemblerState::default();
        let (state, _) = run(
            &state,
            RawEvent::new(
                1,
                RawPayload::ToolUseStart {
                    tool_call_id: "call_1".into(),
                    tool_name: "search".into(),
                },
            ),
        );
        let (state, _) = run(
            &state,
            RawEvent::new(
                2,
                RawPayload::InputJsonDelta {
                    partial_json: "{\"q\": truncat".into(),
                },
            ),
        );
        let (_, events) = run(
            &state,
            RawEvent::new(
                3,
                RawPayload::ToolUseStop {
                    tool_call_id: "call_1".into(),
                },
            ),
        );
        let DerivedEvent::Message(m) = &events[0] else {
            panic!()
        };
        let ContentPart::ToolInvocation { arguments, .. } = &m.content[0] else {
            panic!()
        };
        assert_eq!(arguments, &serde_json::json!({}));
    }

    #[test]
    fn orphan_json_delta_is_dropped() {
        let state = AssemblerState::default();
        let (state, events) = run(
            &state,
            RawEvent::new(
                1,
                RawPayload::InputJsonDelta {
                    partial_json: "{}".into(),
                },
            ),
        );
        assert!(events.is_empty());
        assert!(state.pending_tool.is_none());
    }

    #[test]
    fn message_stop_flushes_remaining_text() {
        let state = AssemblerState::default();
        let (state, _) = run(&state, RawEvent::text_delta(1, "tail", false));
        let (state, events) = run(&state, RawEvent::message_stop(2, "end_turn"));
        assert_eq!(events.len(), 1);
        assert_eq!(message_text(&events[0]), "tail");
        assert_eq!(state.buffered_text(), "");
    }

    #[test]
    fn oversized_delta_fails_without_committing() {
        let state = AssemblerState::default();
        let huge = "x".repeat(MAX_BUFFER_BYTES + 1);
        let err = apply(
            &ctx("a1", "evt-a1-1"),
            &state,
            &[PipelineEvent::Raw(RawEvent::text_delta(1, huge, false))],
        )
        .unwrap_err();
        assert!(matches!(err, StageError::BufferOverflow { .. }));
        // The caller keeps the old section; nothing was buffered there
        assert_eq!(state.buffered_text(), "");
    }

    #[test]
    fn message_ids_are_deterministic_per_agent() {
        let state = AssemblerState::default();
        let (state, events) = run(&state, RawEvent::text_delta(1, "a", true));
        let DerivedEvent::Message(m1) = &events[0] else {
            panic!()
        };
        assert_eq!(m1.message_id, "msg-a1-1");

        let (_, events) = run(&state, RawEvent::text_delta(2, "b", true));
        let DerivedEvent::Message(m2) = &events[0] else {
            panic!()
        };
        assert_eq!(m2.message_id, "msg-a1-2");
    }
}
