//! # Axon - AI-agent session runtime core
//!
//! Axon converts the raw event stream of an AI-agent inference engine into
//! structured, persisted, fan-out-able domain events, with per-agent state
//! isolation and per-agent ordering guarantees.
//!
//! ## Features
//!
//! - **Transformation pipeline**: three chained Mealy-style stages turn raw
//!   stream signals into state transitions, assembled messages, and turn
//!   summaries, with deterministic replay
//! - **Event bus**: bounded per-subscriber queues, configurable backpressure
//!   (bounded wait or drop-oldest), failure isolation, counter snapshots
//! - **Session repository**: indexed session/message persistence over a
//!   pluggable key/value store (in-memory, file, SQLite)
//! - **NDJSON surface**: derived events serialize as one JSON object per line
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axon::bus::{BusConfig, EventBus};
//! use axon::domain::RawEvent;
//! use axon::runtime::TransformEngine;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = TransformEngine::new();
//!     let bus = EventBus::new(BusConfig::default());
//!
//!     let events = engine
//!         .process("agent-1", RawEvent::text_delta(0, "hello", true))
//!         .await;
//!     for event in events {
//!         bus.publish(event).await;
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! Raw event → [`runtime::TransformEngine`] (per-agent state lookup) →
//! ordered derived events → [`bus::EventBus`] publish, and for message/turn
//! boundaries a [`persistence::SessionRepository`] write. The
//! [`manager::SessionManager`] wires those pieces together; transport,
//! inference, and tool execution stay outside this crate.

pub mod bus;
pub mod cli;
pub mod config;
pub mod domain;
pub mod manager;
pub mod persistence;
pub mod runtime;
pub mod storage;
