//! Session repository: indexed CRUD over the storage substrate
//!
//! Key layout:
//! - `sessions:{sessionId}`: primary session record (without messages)
//! - `messages:{sessionId}`: the session's ordered message list
//! - `idx:sessions:template:{templateId}:{sessionId}`: forward index
//! - `idx:sessions:container:{containerId}:{sessionId}`: reverse index
//!
//! Index entries carry no value; existence is membership. The substrate has
//! no multi-key transaction, so a crash between the writes of `save` or
//! `delete` can leave an index entry without its primary record (or the
//! reverse). Reads tolerate that as a non-fatal anomaly, and
//! [`SessionRepository::reconcile_indexes`] repairs it lazily.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::domain::{Session, StoredMessage};
use crate::storage::Storage;

use super::{PersistenceError, PersistenceResult};

const SESSION_PREFIX: &str = "sessions:";
const MESSAGES_PREFIX: &str = "messages:";
const INDEX_PREFIX: &str = "idx:sessions:";
const TEMPLATE_INDEX_PREFIX: &str = "idx:sessions:template:";
const CONTAINER_INDEX_PREFIX: &str = "idx:sessions:container:";

/// Primary session record as stored under `sessions:{id}`
///
/// Messages live under their own key so message appends and session-metadata
/// updates stay reasonably sized.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    session_id: String,
    template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container_id: Option<String>,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    created_at: i64,
    #[serde(default)]
    updated_at: i64,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

impl SessionRecord {
    fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            template_id: session.template_id.clone(),
            container_id: session.container_id.clone(),
            input_tokens: session.input_tokens,
            output_tokens: session.output_tokens,
            created_at: session.created_at,
            updated_at: session.updated_at,
            metadata: session.metadata.clone(),
        }
    }

    fn into_session(self, messages: Vec<StoredMessage>) -> Session {
        Session {
            session_id: self.session_id,
            template_id: self.template_id,
            container_id: self.container_id,
            messages,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            created_at: self.created_at,
            updated_at: self.updated_at,
            metadata: self.metadata,
        }
    }
}

/// Outcome of an index reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Index entries whose primary record no longer exists
    pub removed_dangling: usize,
    /// Forward/reverse entries re-created for existing sessions
    pub restored: usize,
}

/// Repository for sessions and their messages
///
/// Shares the storage backend with all other callers; it offers no cross-key
/// locking, so concurrent `save`/`delete` on the same session id must be
/// serialized externally (the session manager keeps one mutex per session id).
pub struct SessionRepository {
    storage: Arc<dyn Storage>,
}

impl SessionRepository {
    /// Create a repository over the given storage backend
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Load a session with its messages, or `None` if absent
    pub async fn get(&self, session_id: &str) -> PersistenceResult<Option<Session>> {
        let key = session_key(session_id);
        let Some(bytes) = self.storage.get(&key).await? else {
            return Ok(None);
        };

        let record: SessionRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(session_id, error = %e, "malformed session record, treating as absent");
                return Ok(None);
            }
        };

        let messages = self.get_messages(session_id).await?;
        Ok(Some(record.into_session(messages)))
    }

    /// Load a session's messages; a missing or malformed stored value
    /// normalizes to an empty list
    pub async fn get_messages(&self, session_id: &str) -> PersistenceResult<Vec<StoredMessage>> {
        let key = messages_key(session_id);
        let Some(bytes) = self.storage.get(&key).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_slice(&bytes) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                warn!(session_id, error = %e, "malformed message list, returning empty");
                Ok(Vec::new())
            }
        }
    }

    /// Find the session created from `template_id`, if any
    ///
    /// Forward index lookup: a prefix scan over a key space holding at most
    /// one entry per session of that template.
    pub async fn find_by_template_id(
        &self,
        template_id: &str,
    ) -> PersistenceResult<Option<Session>> {
        let prefix = format!("{}{}:", TEMPLATE_INDEX_PREFIX, template_id);
        for key in self.storage.scan_prefix(&prefix).await? {
            let Some(session_id) = key.strip_prefix(&prefix) else {
                continue;
            };
            match self.get(session_id).await? {
                Some(session) => return Ok(Some(session)),
                None => {
                    // Dangling entry: primary record is gone. Tolerated;
                    // reconcile_indexes cleans these up.
                    warn!(index_key = %key, "index entry without session record");
                }
            }
        }
        Ok(None)
    }

    /// All sessions bound to `container_id`
    ///
    /// Reverse index lookup, linear in the number of matches.
    pub async fn find_by_container_id(
        &self,
        container_id: &str,
    ) -> PersistenceResult<Vec<Session>> {
        let prefix = format!("{}{}:", CONTAINER_INDEX_PREFIX, container_id);
        let mut sessions = Vec::new();
        for key in self.storage.scan_prefix(&prefix).await? {
            let Some(session_id) = key.strip_prefix(&prefix) else {
                continue;
            };
            match self.get(session_id).await? {
                Some(session) => sessions.push(session),
                None => warn!(index_key = %key, "index entry without session record"),
            }
        }
        Ok(sessions)
    }

    /// All stored sessions
    ///
    /// Scans the `sessions:` prefix only, so `idx:` and `messages:` keys never
    /// leak into the result.
    pub async fn list_all(&self) -> PersistenceResult<Vec<Session>> {
        let mut sessions = Vec::new();
        for key in self.storage.scan_prefix(SESSION_PREFIX).await? {
            let Some(session_id) = key.strip_prefix(SESSION_PREFIX) else {
                continue;
            };
            if let Some(session) = self.get(session_id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// Persist a session: primary record, message list, then index entries
    ///
    /// Write order is fixed (primary, messages, forward index, reverse index)
    /// so a partial failure leaves at worst an unindexed session, never an
    /// index pointing at data that was never written. If the session's
    /// template or container changed since the last save, the superseded
    /// index entries are removed to keep invariant (1): exactly one forward
    /// entry per session.
    pub async fn save(&self, session: &Session) -> PersistenceResult<()> {
        let previous = self.load_record(&session.session_id).await?;

        let record = SessionRecord::from_session(session);
        let record_bytes = serde_json::to_vec(&record)?;
        let messages_bytes = serde_json::to_vec(&session.messages)?;

        self.storage
            .set(&session_key(&session.session_id), &record_bytes)
            .await?;
        self.storage
            .set(&messages_key(&session.session_id), &messages_bytes)
            .await?;
        self.storage
            .set(
                &template_index_key(&session.template_id, &session.session_id),
                b"",
            )
            .await?;
        if let Some(container_id) = &session.container_id {
            self.storage
                .set(&container_index_key(container_id, &session.session_id), b"")
                .await?;
        }

        // Drop index entries that no longer match the session's fields
        if let Some(previous) = previous {
            if previous.template_id != session.template_id {
                self.storage
                    .delete(&template_index_key(
                        &previous.template_id,
                        &session.session_id,
                    ))
                    .await?;
            }
            if let Some(old_container) = &previous.container_id {
                if session.container_id.as_deref() != Some(old_container) {
                    self.storage
                        .delete(&container_index_key(old_container, &session.session_id))
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Remove a session, its messages, and every index entry pointing at it
    pub async fn delete(&self, session_id: &str) -> PersistenceResult<()> {
        // Read first to learn which index entries exist
        let record = self.load_record(session_id).await?;

        self.storage.delete(&session_key(session_id)).await?;
        self.storage.delete(&messages_key(session_id)).await?;

        match record {
            Some(record) => {
                self.storage
                    .delete(&template_index_key(&record.template_id, session_id))
                    .await?;
                if let Some(container_id) = &record.container_id {
                    self.storage
                        .delete(&container_index_key(container_id, session_id))
                        .await?;
                }
            }
            None => {
                // Primary already gone (earlier partial delete). Sweep the
                // index space for any entry still naming this session.
                let suffix = format!(":{}", session_id);
                for key in self.storage.scan_prefix(INDEX_PREFIX).await? {
                    if key.ends_with(&suffix) {
                        self.storage.delete(&key).await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Repair index/primary mismatches left by interrupted multi-key writes
    ///
    /// Removes index entries whose session record is gone and re-creates
    /// missing entries for sessions that exist. Safe to run concurrently with
    /// reads; writers for a given session should be quiesced.
    pub async fn reconcile_indexes(&self) -> PersistenceResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for key in self.storage.scan_prefix(INDEX_PREFIX).await? {
            let Some(session_id) = key.rsplit(':').next() else {
                continue;
            };
            if self.storage.get(&session_key(session_id)).await?.is_none() {
                self.storage.delete(&key).await?;
                report.removed_dangling += 1;
            }
        }

        for key in self.storage.scan_prefix(SESSION_PREFIX).await? {
            let Some(session_id) = key.strip_prefix(SESSION_PREFIX) else {
                continue;
            };
            let Some(record) = self.load_record(session_id).await? else {
                continue;
            };

            let forward = template_index_key(&record.template_id, session_id);
            if self.storage.get(&forward).await?.is_none() {
                self.storage.set(&forward, b"").await?;
                report.restored += 1;
            }
            if let Some(container_id) = &record.container_id {
                let reverse = container_index_key(container_id, session_id);
                if self.storage.get(&reverse).await?.is_none() {
                    self.storage.set(&reverse, b"").await?;
                    report.restored += 1;
                }
            }
        }

        Ok(report)
    }

    async fn load_record(&self, session_id: &str) -> PersistenceResult<Option<SessionRecord>> {
        let Some(bytes) = self.storage.get(&session_key(session_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(session_id, error = %e, "malformed session record");
                Ok(None)
            }
        }
    }
}

fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}

fn messages_key(session_id: &str) -> String {
    format!("{}{}", MESSAGES_PREFIX, session_id)
}

fn template_index_key(template_id: &str, session_id: &str) -> String {
    format!("{}{}:{}", TEMPLATE_INDEX_PREFIX, template_id, session_id)
}

fn container_index_key(container_id: &str, session_id: &str) -> String {
    format!("{}{}:{}", CONTAINER_INDEX_PREFIX, container_id, session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContentPart, Role};
    use crate::storage::MemoryStorage;

    fn repo() -> (Arc<MemoryStorage>, SessionRepository) {
        let storage = Arc::new(MemoryStorage::new());
        let repository = SessionRepository::new(storage.clone());
        (storage, repository)
    }

    fn sample_session() -> Session {
        let mut session = Session::with_id("s1", "tmpl-1", Some("ctr-1".into()));
        session.add_message(StoredMessage {
            message_id: "m1".into(),
            role: Role::Assistant,
            content: vec![ContentPart::text("hello")],
            timestamp: 5,
        });
        session
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let (_, repo) = repo();
        let session = sample_session();
        repo.save(&session).await.unwrap();

        let loaded = repo.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn lookups_find_saved_session() {
        let (_, repo) = repo();
        repo.save(&sample_session()).await.unwrap();

        let by_template = repo.find_by_template_id("tmpl-1").await.unwrap().unwrap();
        assert_eq!(by_template.session_id, "s1");

        let by_container = repo.find_by_container_id("ctr-1").await.unwrap();
        assert_eq!(by_container.len(), 1);

        assert!(repo.find_by_template_id("other").await.unwrap().is_none());
        assert!(repo.find_by_container_id("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_every_key() {
        let (storage, repo) = repo();
        repo.save(&sample_session()).await.unwrap();
        repo.delete("s1").await.unwrap();

        assert!(repo.get("s1").await.unwrap().is_none());
        assert!(repo.get_messages("s1").await.unwrap().is_empty());
        assert!(repo.find_by_template_id("tmpl-1").await.unwrap().is_none());
        assert!(repo.find_by_container_id("ctr-1").await.unwrap().is_empty());
        assert!(storage.scan_prefix("idx:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_without_primary_sweeps_indexes() {
        let (storage, repo) = repo();
        repo.save(&sample_session()).await.unwrap();
        // Simulate a crash that removed the primary but left indexes behind
        storage.delete("sessions:s1").await.unwrap();

        repo.delete("s1").await.unwrap();
        assert!(storage.scan_prefix("idx:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_all_excludes_index_keys() {
        let (storage, repo) = repo();
        repo.save(&sample_session()).await.unwrap();
        let mut second = Session::with_id("s2", "tmpl-2", None);
        second.created_at = 1;
        repo.save(&second).await.unwrap();

        // Plenty of non-session keys in the same store
        assert!(!storage.scan_prefix("idx:").await.unwrap().is_empty());
        assert!(!storage.scan_prefix("messages:").await.unwrap().is_empty());

        let mut ids: Vec<String> = repo
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn malformed_messages_normalize_to_empty() {
        let (storage, repo) = repo();
        repo.save(&sample_session()).await.unwrap();
        storage.set("messages:s1", b"not json").await.unwrap();

        assert!(repo.get_messages("s1").await.unwrap().is_empty());
        // get() still returns the session, with no messages
        let session = repo.get("s1").await.unwrap().unwrap();
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn dangling_index_is_tolerated() {
        let (storage, repo) = repo();
        storage
            .set("idx:sessions:template:tmpl-9:ghost", b"")
            .await
            .unwrap();

        assert!(repo.find_by_template_id("tmpl-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_with_changed_template_moves_forward_index() {
        let (storage, repo) = repo();
        let mut session = sample_session();
        repo.save(&session).await.unwrap();

        session.template_id = "tmpl-2".into();
        session.container_id = Some("ctr-2".into());
        repo.save(&session).await.unwrap();

        let idx_keys = storage.scan_prefix("idx:").await.unwrap();
        assert_eq!(
            idx_keys,
            vec![
                "idx:sessions:container:ctr-2:s1",
                "idx:sessions:template:tmpl-2:s1",
            ]
        );
    }

    #[tokio::test]
    async fn reconcile_repairs_both_directions() {
        let (storage, repo) = repo();
        repo.save(&sample_session()).await.unwrap();

        // Orphan entry plus a missing forward entry
        storage
            .set("idx:sessions:template:tmpl-x:ghost", b"")
            .await
            .unwrap();
        storage
            .delete("idx:sessions:template:tmpl-1:s1")
            .await
            .unwrap();

        let report = repo.reconcile_indexes().await.unwrap();
        assert_eq!(report.removed_dangling, 1);
        assert_eq!(report.restored, 1);

        assert!(repo.find_by_template_id("tmpl-1").await.unwrap().is_some());
        assert!(storage
            .get("idx:sessions:template:tmpl-x:ghost")
            .await
            .unwrap()
            .is_none());
    }
}
