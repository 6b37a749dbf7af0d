//! Session management for agentd.
//!
//! The [`SessionManager`] owns the map of live sessions and the
//! on-disk layout under `<root>/sessions/<id>/`:
//!
//! ```text
//! sessions/<id>/
//!   session_config.json     # spec + server-assigned timestamps
//!   memory/                 # JSONL memory store
//!   mcp/                    # per-service persistent data
//!   graphs/                 # graph service documents
//!   logs/
//! ```
//!
//! Config writes are atomic (write-temp-then-rename) and never include
//! provider credentials.

pub mod session;

pub use session::Session;

use agentd_agent::TurnEvent;
use agentd_config::AppConfig;
use agentd_core::error::{Error, Result};
use agentd_core::session::{ListSource, SessionConfig, SessionSpec, SessionSummary};
use agentd_services::ServiceRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CONFIG_FILE: &str = "session_config.json";
const SESSION_SUBDIRS: [&str; 4] = ["memory", "mcp", "graphs", "logs"];

/// Partial update applied by `Update`; `id` and provider selection are
/// immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Aggregate counters for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub live_sessions: usize,
}

pub struct SessionManager {
    root: PathBuf,
    runtime: agentd_config::RuntimeConfig,
    registry: Arc<ServiceRegistry>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    turn_budget: Arc<Semaphore>,
}

impl SessionManager {
    pub fn new(config: &AppConfig, registry: Arc<ServiceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            root: config.sessions_dir(),
            runtime: config.runtime.clone(),
            registry,
            sessions: RwLock::new(HashMap::new()),
            turn_budget: Arc::new(Semaphore::new(config.runtime.effective_turn_budget())),
        })
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Create a session: validate, build the directory tree, persist
    /// the config, and instantiate (but do not initialize) the live
    /// session.
    pub async fn create(&self, spec: SessionSpec) -> Result<SessionConfig> {
        validate_id(&spec.id)?;

        let dir = self.session_dir(&spec.id);
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(&spec.id) || dir.exists() {
                return Err(Error::AlreadyExists(spec.id));
            }
        }

        for subdir in SESSION_SUBDIRS {
            std::fs::create_dir_all(dir.join(subdir))?;
        }

        let config = SessionConfig::new(spec);
        write_config(&dir, &config)?;

        let session = Session::new(
            config.clone(),
            dir,
            self.runtime.clone(),
            self.registry.clone(),
        );
        self.sessions
            .write()
            .await
            .insert(config.spec.id.clone(), session);

        info!(session = %config.spec.id, "session created");
        Ok(config)
    }

    /// Fetch a session's config, live or from disk.
    pub async fn get(&self, id: &str) -> Result<SessionConfig> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return Ok(session.config().await);
        }
        load_config(&self.session_dir(id))
            .ok_or_else(|| Error::NotFound(format!("session '{id}'")))
    }

    /// List sessions from memory, disk, or both. Sorted by
    /// `updated_at`, newest first.
    pub async fn list(&self, source: ListSource) -> Result<Vec<SessionSummary>> {
        let mut summaries: Vec<SessionSummary> = Vec::new();

        let live_ids: Vec<String> = {
            let sessions = self.sessions.read().await;
            if matches!(source, ListSource::Memory | ListSource::All) {
                for session in sessions.values() {
                    summaries.push(summarize(&session.config().await, true));
                }
            }
            sessions.keys().cloned().collect()
        };

        if matches!(source, ListSource::File | ListSource::All) {
            if let Ok(entries) = std::fs::read_dir(&self.root) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if !path.is_dir() {
                        continue;
                    }
                    let Some(config) = load_config(&path) else {
                        warn!(dir = %path.display(), "skipping session dir without valid config");
                        continue;
                    };
                    let is_live = live_ids.contains(&config.spec.id);
                    // In `all` mode live sessions are already listed.
                    if matches!(source, ListSource::All) && is_live {
                        continue;
                    }
                    summaries.push(summarize(&config, is_live));
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Update mutable fields. Never changes `id` or provider selection.
    pub async fn update(&self, id: &str, update: SessionUpdate) -> Result<SessionConfig> {
        let apply = |config: &mut SessionConfig| {
            if let Some(display_name) = &update.display_name {
                config.spec.display_name = display_name.clone();
            }
            if let Some(description) = &update.description {
                config.spec.description = description.clone();
            }
            if let Some(metadata) = &update.metadata {
                config.spec.metadata.extend(metadata.clone());
            }
        };

        let dir = self.session_dir(id);
        let config = if let Some(session) = self.sessions.read().await.get(id) {
            session.update_config(apply).await
        } else {
            let mut config = load_config(&dir)
                .ok_or_else(|| Error::NotFound(format!("session '{id}'")))?;
            apply(&mut config);
            config.updated_at = chrono::Utc::now();
            config
        };

        write_config(&dir, &config)?;
        Ok(config)
    }

    /// Delete a session: tear down its pool, drop the live entry,
    /// remove the directory. Idempotent.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let session = self.sessions.write().await.remove(id);
        if let Some(session) = session {
            session.close().await;
        }

        let dir = self.session_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            info!(session = %id, "session deleted");
        }
        Ok(())
    }

    /// Get (or revive from disk) the live session.
    pub async fn live(&self, id: &str) -> Result<Arc<Session>> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return Ok(session.clone());
        }

        let dir = self.session_dir(id);
        let config =
            load_config(&dir).ok_or_else(|| Error::NotFound(format!("session '{id}'")))?;

        let mut sessions = self.sessions.write().await;
        // Double-checked: another caller may have revived it.
        if let Some(session) = sessions.get(id) {
            return Ok(session.clone());
        }
        let session = Session::new(config, dir, self.runtime.clone(), self.registry.clone());
        sessions.insert(id.to_string(), session.clone());
        Ok(session)
    }

    /// Run one turn on a session.
    pub async fn run(
        &self,
        id: &str,
        message: String,
        max_iterations: Option<u32>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<TurnEvent>> {
        let session = self.live(id).await?;
        session
            .run(message, max_iterations, cancel, self.turn_budget.clone())
            .await
    }

    pub async fn stats(&self) -> SessionStats {
        let total = std::fs::read_dir(&self.root)
            .map(|entries| entries.flatten().filter(|e| e.path().is_dir()).count())
            .unwrap_or(0);
        SessionStats {
            total_sessions: total,
            live_sessions: self.sessions.read().await.len(),
        }
    }

    /// Tear down every live session (process shutdown).
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidInput("session id must not be empty".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidInput(format!(
            "session id '{id}' may only contain alphanumerics, '-' and '_'"
        )));
    }
    Ok(())
}

fn summarize(config: &SessionConfig, live: bool) -> SessionSummary {
    SessionSummary {
        id: config.spec.id.clone(),
        display_name: config.spec.display_name.clone(),
        description: config.spec.description.clone(),
        created_at: config.created_at,
        updated_at: config.updated_at,
        live,
    }
}

fn load_config(dir: &Path) -> Option<SessionConfig> {
    let raw = std::fs::read_to_string(dir.join(CONFIG_FILE)).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Atomic write: temp file in the same directory, then rename.
fn write_config(dir: &Path, config: &SessionConfig) -> Result<()> {
    let raw = serde_json::to_string_pretty(config)?;
    let tmp = dir.join(format!("{CONFIG_FILE}.tmp"));
    std::fs::write(&tmp, raw)?;
    std::fs::rename(&tmp, dir.join(CONFIG_FILE))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentd_core::error::ProviderError;
    use agentd_core::provider::{
        ChatRequest, Provider, ProviderEvent, ProviderKind, ProviderSettings,
    };
    use async_trait::async_trait;
    use tempfile::tempdir;

    fn manager(dir: &tempfile::TempDir) -> Arc<SessionManager> {
        let mut config = AppConfig::default();
        config.data_dir = dir.path().to_path_buf();
        SessionManager::new(&config, Arc::new(ServiceRegistry::with_builtins()))
    }

    fn spec(id: &str) -> SessionSpec {
        SessionSpec {
            id: id.into(),
            display_name: format!("Session {id}"),
            description: String::new(),
            model_provider: ProviderKind::LocalHttp,
            provider_settings: ProviderSettings {
                model: "test-model".into(),
                base_url: "http://127.0.0.1:1/v1".into(),
                api_key: None,
                temperature: 0.7,
                max_tokens: None,
            },
            agent_settings: Default::default(),
            tool_servers: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn create_builds_directory_layout() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);

        manager.create(spec("s1")).await.unwrap();

        let base = dir.path().join("sessions").join("s1");
        assert!(base.join("session_config.json").exists());
        for subdir in SESSION_SUBDIRS {
            assert!(base.join(subdir).is_dir(), "{subdir} missing");
        }
    }

    #[tokio::test]
    async fn create_then_get_roundtrips_spec() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);

        let created = manager.create(spec("s1")).await.unwrap();
        let fetched = manager.get("s1").await.unwrap();

        assert_eq!(fetched.spec.id, "s1");
        assert_eq!(fetched.spec.display_name, "Session s1");
        assert_eq!(fetched.created_at, created.created_at);
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);

        manager.create(spec("s1")).await.unwrap();
        let err = manager.create(spec("s1")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn invalid_id_rejected() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        assert!(matches!(
            manager.create(spec("")).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            manager.create(spec("../escape")).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn api_key_never_persisted() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);

        let mut s = spec("s1");
        s.provider_settings.api_key = Some("sk-very-secret".into());
        manager.create(s).await.unwrap();

        let raw = std::fs::read_to_string(
            dir.path().join("sessions/s1/session_config.json"),
        )
        .unwrap();
        assert!(!raw.contains("sk-very-secret"));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_removes_dir() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);

        manager.create(spec("s1")).await.unwrap();
        manager.delete("s1").await.unwrap();
        manager.delete("s1").await.unwrap();

        assert!(!dir.path().join("sessions/s1").exists());
        assert!(matches!(
            manager.get("s1").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_sources() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);

        manager.create(spec("live1")).await.unwrap();
        manager.create(spec("disk1")).await.unwrap();
        // Drop disk1 from memory to make it disk-only.
        manager.sessions.write().await.remove("disk1");

        let memory = manager.list(ListSource::Memory).await.unwrap();
        assert_eq!(memory.len(), 1);
        assert_eq!(memory[0].id, "live1");
        assert!(memory[0].live);

        let file = manager.list(ListSource::File).await.unwrap();
        assert_eq!(file.len(), 2);

        let all = manager.list(ListSource::All).await.unwrap();
        assert_eq!(all.len(), 2);
        let disk_row = all.iter().find(|s| s.id == "disk1").unwrap();
        assert!(!disk_row.live);
    }

    #[tokio::test]
    async fn update_mutates_allowed_fields_only() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        manager.create(spec("s1")).await.unwrap();

        let updated = manager
            .update(
                "s1",
                SessionUpdate {
                    display_name: Some("Renamed".into()),
                    description: Some("new purpose".into()),
                    metadata: Some(HashMap::from([(
                        "team".into(),
                        serde_json::json!("platform"),
                    )])),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.spec.display_name, "Renamed");
        assert_eq!(updated.spec.id, "s1");
        assert_eq!(updated.spec.metadata["team"], "platform");
        assert!(updated.updated_at >= updated.created_at);

        // Persisted too.
        let fetched = manager.get("s1").await.unwrap();
        assert_eq!(fetched.spec.display_name, "Renamed");

        let err = manager
            .update("ghost", SessionUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn revive_from_disk() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        manager.create(spec("s1")).await.unwrap();
        manager.sessions.write().await.clear();

        let session = manager.live("s1").await.unwrap();
        assert_eq!(session.config().await.spec.id, "s1");
        assert_eq!(manager.sessions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_message_rejected() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        manager.create(spec("s1")).await.unwrap();

        let err = manager
            .run("s1", "   ".into(), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    // --- Turn execution through a scripted provider ---

    struct OneShotProvider;

    #[async_trait]
    impl Provider for OneShotProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat_stream(
            &self,
            _request: ChatRequest,
        ) -> std::result::Result<
            mpsc::Receiver<std::result::Result<ProviderEvent, ProviderError>>,
            ProviderError,
        > {
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                let _ = tx
                    .send(Ok(ProviderEvent::ContentDelta {
                        text: "hello".into(),
                    }))
                    .await;
                let _ = tx.send(Ok(ProviderEvent::Done)).await;
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn turn_streams_to_completion() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        manager.create(spec("s1")).await.unwrap();

        let session = manager.live("s1").await.unwrap();
        session.seed_provider_for_tests(Arc::new(OneShotProvider));

        let mut rx = manager
            .run("s1", "hi".into(), None, CancellationToken::new())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(
            events.last().unwrap(),
            TurnEvent::Complete { final_response, iterations: 1 }
                if final_response == "hello"
        ));
    }

    #[tokio::test]
    async fn concurrent_turn_rejected_without_mutation() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        manager.create(spec("s1")).await.unwrap();

        let session = manager.live("s1").await.unwrap();
        session.seed_provider_for_tests(Arc::new(OneShotProvider));

        // Occupy the turn gate as a running turn would.
        let _gate = session.turn_gate.clone().try_lock_owned().unwrap();
        let before = session.context().lock().await.len();

        let err = manager
            .run("s1", "hi".into(), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
        assert_eq!(session.context().lock().await.len(), before);
    }
}
