//! Session manager: wires the raw-event source to the engine, the bus, and
//! the repository
//!
//! Thin orchestrator. Every derived event is published to the bus; message
//! and turn events additionally trigger repository writes, serialized by one
//! in-process mutex per session id because the storage substrate offers no
//! cross-key locking.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::bus::EventBus;
use crate::domain::{DerivedEvent, RawEvent, Session};
use crate::persistence::{PersistenceResult, SessionRepository};
use crate::runtime::TransformEngine;

/// Orchestrates the engine → bus → repository flow for bound agents
pub struct SessionManager {
    engine: Arc<TransformEngine>,
    bus: EventBus,
    repository: Arc<SessionRepository>,
    /// agent id → session id
    bindings: RwLock<HashMap<String, String>>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    /// Create a manager over the given components
    pub fn new(
        engine: Arc<TransformEngine>,
        bus: EventBus,
        repository: Arc<SessionRepository>,
    ) -> Self {
        Self {
            engine,
            bus,
            repository,
            bindings: RwLock::new(HashMap::new()),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create and persist a new session
    pub async fn open_session(
        &self,
        template_id: impl Into<String>,
        container_id: Option<String>,
    ) -> PersistenceResult<Session> {
        let session = Session::new(template_id, container_id);
        self.repository.save(&session).await?;
        Ok(session)
    }

    /// Load a session, degrading to a fresh one when the load fails
    ///
    /// A storage failure or missing record must not block the user: the
    /// failure is logged and an empty session with the same id is returned.
    pub async fn load_or_create(
        &self,
        session_id: &str,
        template_id: &str,
        container_id: Option<String>,
    ) -> Session {
        match self.repository.get(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => Session::with_id(session_id, template_id, container_id),
            Err(e) => {
                warn!(session_id, error = %e, "session load failed, starting fresh");
                Session::with_id(session_id, template_id, container_id)
            }
        }
    }

    /// Route an agent's derived events into a session
    pub async fn bind_agent(&self, agent_id: impl Into<String>, session_id: impl Into<String>) {
        self.bindings
            .write()
            .await
            .insert(agent_id.into(), session_id.into());
    }

    /// Session an agent is bound to, if any
    pub async fn binding(&self, agent_id: &str) -> Option<String> {
        self.bindings.read().await.get(agent_id).cloned()
    }

    /// Unbind an agent and drop its processing state
    pub async fn release_agent(&self, agent_id: &str) {
        self.bindings.write().await.remove(agent_id);
        self.engine.dispose(agent_id).await;
    }

    /// Drive one raw event through the pipeline
    ///
    /// Publishes every derived event to the bus. If the agent is bound to a
    /// session, assembled messages are appended and turn token usage is added
    /// under the session's lock. Persist failures are logged and do not stop
    /// the stream; the events are still returned to the caller.
    pub async fn ingest(&self, agent_id: &str, raw: RawEvent) -> Vec<DerivedEvent> {
        let events = self.engine.process(agent_id, raw).await;

        for event in &events {
            self.bus.publish(event.clone()).await;
        }

        if let Some(session_id) = self.binding(agent_id).await {
            self.persist_boundaries(&session_id, &events).await;
        }

        events
    }

    /// Delete a session and all its derived keys, serialized with other
    /// writers of the same session
    pub async fn delete_session(&self, session_id: &str) -> PersistenceResult<()> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;
        self.repository.delete(session_id).await
    }

    async fn persist_boundaries(&self, session_id: &str, events: &[DerivedEvent]) {
        let mut messages = Vec::new();
        let mut usage: Vec<(u64, u64)> = Vec::new();
        for event in events {
            match event {
                DerivedEvent::Message(m) => messages.push(m.to_stored()),
                DerivedEvent::Turn(t) => usage.push((t.input_tokens, t.output_tokens)),
                DerivedEvent::State(_) => {}
            }
        }
        if messages.is_empty() && usage.is_empty() {
            return;
        }

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        match self.repository.get(session_id).await {
            Ok(Some(mut session)) => {
                for message in messages {
                    session.add_message(message);
                }
                for (input, output) in usage {
                    session.add_usage(input, output);
                }
                if let Err(e) = self.repository.save(&session).await {
                    warn!(session_id, error = %e, "failed to persist session update");
                }
            }
            Ok(None) => {
                warn!(session_id, "agent bound to a session that no longer exists");
            }
            Err(e) => {
                warn!(session_id, error = %e, "failed to load session for update");
            }
        }
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
