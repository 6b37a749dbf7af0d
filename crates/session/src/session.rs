//! A live session: configuration, context, memory, tool pool, and the
//! per-session turn gate.

use agentd_agent::{EngineSettings, IterationEngine, SessionContext, TurnEvent};
use agentd_config::RuntimeConfig;
use agentd_core::error::{Error, Result};
use agentd_core::memory::MemoryStore;
use agentd_core::provider::Provider;
use agentd_core::session::{SessionConfig, ToolServerSpec};
use agentd_mcp::{PoolLimits, ToolSessionPool};
use agentd_memory::FileStore;
use agentd_providers::build_provider;
use agentd_services::{ServiceContext, ServiceManager, ServiceRegistry, SERVICE_MANAGER_NAME};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, OnceCell, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Session {
    config: RwLock<SessionConfig>,
    dir: PathBuf,
    runtime: RuntimeConfig,
    registry: Arc<ServiceRegistry>,

    context: Arc<Mutex<SessionContext>>,
    pool: Arc<ToolSessionPool>,
    memory: Arc<dyn MemoryStore>,

    /// Set once by `initialize`: the built provider, with the tool pool
    /// started as a side effect.
    init: OnceCell<Arc<dyn Provider>>,

    /// At most one turn runs at a time; `try_lock` failure = Busy.
    pub(crate) turn_gate: Arc<Mutex<()>>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        dir: PathBuf,
        runtime: RuntimeConfig,
        registry: Arc<ServiceRegistry>,
    ) -> Arc<Self> {
        let memory: Arc<dyn MemoryStore> =
            Arc::new(FileStore::open(FileStore::session_path(&dir)));
        let context = Arc::new(Mutex::new(SessionContext::new(
            &config.spec.agent_settings,
            Some(memory.clone()),
        )));
        let pool = ToolSessionPool::new(pool_limits(&runtime));

        Arc::new(Self {
            config: RwLock::new(config),
            dir,
            runtime,
            registry,
            context,
            pool,
            memory,
            init: OnceCell::new(),
            turn_gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn config(&self) -> SessionConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config<F: FnOnce(&mut SessionConfig)>(&self, mutate: F) -> SessionConfig {
        let mut config = self.config.write().await;
        mutate(&mut config);
        config.updated_at = chrono::Utc::now();
        config.clone()
    }

    pub fn context(&self) -> Arc<Mutex<SessionContext>> {
        self.context.clone()
    }

    pub fn pool(&self) -> Arc<ToolSessionPool> {
        self.pool.clone()
    }

    pub fn memory(&self) -> Arc<dyn MemoryStore> {
        self.memory.clone()
    }

    /// Bring the session up: build the provider, start the configured
    /// tool servers, attach the built-in service manager. Idempotent.
    pub async fn initialize(self: &Arc<Self>) -> Result<Arc<dyn Provider>> {
        let provider = self
            .init
            .get_or_try_init(|| async {
                let config = self.config.read().await.clone();
                let provider =
                    build_provider(config.spec.model_provider, &config.spec.provider_settings)?;

                let service_ctx = self.service_context();
                for server in &config.spec.tool_servers {
                    let attach = match server {
                        ToolServerSpec::Subprocess {
                            name,
                            command,
                            args,
                            env,
                        } => {
                            self.pool
                                .add_subprocess(name, command, args.clone(), env.clone())
                                .await
                        }
                        ToolServerSpec::InProcess {
                            name,
                            factory_id,
                            config: service_config,
                        } => match self.registry.create(
                            factory_id,
                            &service_ctx,
                            service_config.clone(),
                        ) {
                            Ok(service) => self.pool.add_in_process(name, service).await,
                            Err(e) => {
                                warn!(server = %name, error = %e, "service factory failed");
                                continue;
                            }
                        },
                    };
                    if let Err(e) = attach {
                        warn!(server = %server.name(), error = %e, "failed to attach tool server");
                    }
                }

                // The meta-MCP server rides along in every session.
                let manager =
                    ServiceManager::new(self.registry.clone(), service_ctx, &self.pool);
                if let Err(e) = self
                    .pool
                    .add_in_process(SERVICE_MANAGER_NAME, Arc::new(manager))
                    .await
                {
                    warn!(error = %e, "failed to attach service manager");
                }

                info!(session = %config.spec.id, "session initialized");
                Ok::<_, Error>(provider)
            })
            .await?;

        Ok(provider.clone())
    }

    fn service_context(&self) -> ServiceContext {
        ServiceContext {
            data_dir: self.dir.join("mcp"),
            graphs_dir: self.dir.join("graphs"),
            memory: self.memory.clone(),
            sandbox_timeout: Duration::from_secs(self.runtime.sandbox_timeout_secs),
        }
    }

    /// Run one turn. Fails fast with `Busy` when another turn is active
    /// on this session; the global `budget` bounds turns across all
    /// sessions.
    pub async fn run(
        self: &Arc<Self>,
        user_input: String,
        max_iterations: Option<u32>,
        cancel: CancellationToken,
        budget: Arc<Semaphore>,
    ) -> Result<mpsc::Receiver<TurnEvent>> {
        if user_input.trim().is_empty() {
            return Err(Error::InvalidInput("message must not be empty".into()));
        }

        let provider = self.initialize().await?;

        let config = self.config.read().await.clone();
        let gate = self
            .turn_gate
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::Busy(config.spec.id.clone()))?;

        let permit = budget
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("turn budget semaphore closed".into()))?;

        self.update_config(|_| {}).await; // bump updated_at

        let engine = IterationEngine::new(
            provider,
            EngineSettings {
                model: config.spec.provider_settings.model.clone(),
                temperature: config.spec.provider_settings.temperature,
                max_tokens: config.spec.provider_settings.max_tokens,
                max_iterations: config.spec.agent_settings.max_iterations,
            },
        );

        let inner_rx = engine.run(
            self.context.clone(),
            self.pool.clone(),
            user_input,
            max_iterations,
            cancel,
        );

        // Forward events while holding the gate and budget permit for
        // the whole turn.
        let (tx, rx) = mpsc::channel(128);
        tokio::spawn(async move {
            let _gate = gate;
            let _permit = permit;
            let mut inner_rx = inner_rx;
            while let Some(event) = inner_rx.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// Tear down the session's tool pool.
    pub async fn close(&self) {
        self.pool.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn seed_provider_for_tests(&self, provider: Arc<dyn Provider>) {
        let _ = self.init.set(provider);
    }
}

fn pool_limits(runtime: &RuntimeConfig) -> PoolLimits {
    PoolLimits {
        startup_timeout: Duration::from_secs(runtime.startup_timeout_secs),
        call_timeout: Duration::from_secs(runtime.tool_call_timeout_secs),
        reconnect_attempts: runtime.reconnect_attempts,
        ..PoolLimits::default()
    }
}
