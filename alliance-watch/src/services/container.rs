//! Service container.
//!
//! Builds every component from the configuration, wires them together and
//! owns their lifecycle.

use std::sync::Arc;

use parking_lot::Mutex;
use player_api::captcha::{CommandSolver, LocalSolver, NoLocalSolver, RemoteSolver, TwoCaptchaClient};
use player_api::client::build_client;
use player_api::{
    CaptchaPipeline, CaptchaPolicy, PlayerDataClient, PlayerResult, ProviderConfig, ProviderMode,
    ProviderSelector,
};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::handler::OperationDispatcher;
use crate::config::{AppConfig, load_proxies};
use crate::database::repositories::{
    SqlxAllianceRepository, SqlxChangeRepository, SqlxMemberRepository,
};
use crate::monitor::ChangeDetector;
use crate::notification::{StatusBroadcaster, spawn_status_logger};
use crate::queue::{Operation, QueueInfo, RequestQueue};
use crate::scheduler::AllianceMonitor;
use crate::{Error, Result};

/// Default event channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 256;

type Dispatcher = OperationDispatcher<
    PlayerDataClient,
    SqlxAllianceRepository,
    SqlxMemberRepository,
    SqlxChangeRepository,
>;

/// Build the player API client described by the configuration.
pub async fn build_player_client(config: &AppConfig) -> Result<PlayerDataClient> {
    let proxies = load_proxies(&config.api.proxy_file).await?;
    let selector = ProviderSelector::new(ProviderConfig {
        primary_url: config.api.primary_url.clone(),
        fallback_url: config.api.fallback_url.clone(),
        proxies,
        secret: config.api.secret.clone(),
        probe_player_id: config.api.probe_player_id,
        request_timeout: config.api.request_timeout,
    })?;

    let captcha = &config.captcha;
    let local: Box<dyn LocalSolver> = match CommandSolver::from_command_line(&captcha.local_solver_command) {
        Some(solver) => {
            info!(program = solver.program(), "Local captcha solver configured");
            Box::new(solver)
        }
        None => Box::new(NoLocalSolver),
    };
    let remote: Option<Box<dyn RemoteSolver>> = if captcha.two_captcha_api_key.is_empty() {
        None
    } else {
        let client = build_client(None, config.api.request_timeout)?;
        Some(Box::new(
            TwoCaptchaClient::new(client, captcha.two_captcha_api_key.clone())
                .with_polling(captcha.poll_interval, captcha.remote_timeout),
        ))
    };

    let pipeline = CaptchaPipeline::new(
        local,
        remote,
        CaptchaPolicy {
            local_attempts: captcha.local_attempts,
            min_confidence: captcha.min_confidence,
        },
    );
    Ok(PlayerDataClient::new(selector, pipeline, config.api.secret.clone()))
}

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    pub config: AppConfig,
    pub alliance_repo: Arc<SqlxAllianceRepository>,
    pub member_repo: Arc<SqlxMemberRepository>,
    pub change_repo: Arc<SqlxChangeRepository>,
    /// Status event broadcaster.
    pub events: StatusBroadcaster,
    pub queue: RequestQueue,
    pub monitor: AllianceMonitor<SqlxAllianceRepository>,
    /// Handed to the queue worker on start.
    dispatcher: Mutex<Option<Dispatcher>>,
    provider_mode: watch::Receiver<ProviderMode>,
    status_logger: Mutex<Option<JoinHandle<()>>>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    pub async fn new(pool: SqlitePool, config: AppConfig) -> Result<Self> {
        info!("Initializing service container");

        let alliance_repo = Arc::new(SqlxAllianceRepository::new(pool.clone()));
        let member_repo = Arc::new(SqlxMemberRepository::new(pool.clone()));
        let change_repo = Arc::new(SqlxChangeRepository::new(pool.clone()));
        let events = StatusBroadcaster::with_capacity(DEFAULT_EVENT_CAPACITY);

        let client = build_player_client(&config).await?;
        match client.captcha().remote_balance().await {
            Some(Ok(balance)) => info!(balance, "2Captcha account balance"),
            Some(Err(e)) => warn!("Could not read 2Captcha balance: {}", e),
            None => info!("Remote captcha solving disabled"),
        }

        let (provider_tx, provider_mode) = watch::channel(client.provider_mode().clone());

        let queue = RequestQueue::new(config.queue.clone(), config.backoff.clone(), events.clone());
        let detector = Arc::new(ChangeDetector::new(
            alliance_repo.clone(),
            member_repo.clone(),
            change_repo.clone(),
            events.clone(),
            config.detector.clone(),
        ));
        let dispatcher = OperationDispatcher::new(client, detector, events.clone(), provider_tx);
        let monitor = AllianceMonitor::new(alliance_repo.clone(), queue.clone(), config.monitor.clone());

        Ok(Self {
            pool,
            config,
            alliance_repo,
            member_repo,
            change_repo,
            events,
            queue,
            monitor,
            dispatcher: Mutex::new(Some(dispatcher)),
            provider_mode,
            status_logger: Mutex::new(None),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Start the worker, probe the providers and start the scheduler.
    pub async fn start(&self) -> Result<()> {
        let logger = spawn_status_logger(&self.events, self.cancellation_token.child_token());
        *self.status_logger.lock() = Some(logger);

        let dispatcher = self.dispatcher.lock().take();
        match dispatcher {
            Some(dispatcher) => {
                self.queue.start_worker(dispatcher);
            }
            None => warn!("Services already started"),
        }

        // The probe runs on the worker, ahead of any scheduled check.
        self.queue
            .enqueue(Operation::probe_providers().with_origin("startup"))?;

        let waiters = self.monitor.start().await?;
        info!(waiters, "Services started");
        Ok(())
    }

    pub fn provider_mode(&self) -> ProviderMode {
        self.provider_mode.borrow().clone()
    }

    pub fn active_description(&self) -> String {
        self.provider_mode.borrow().description()
    }

    pub fn queue_info(&self) -> QueueInfo {
        self.queue.queue_info()
    }

    /// One-off lookup through the queue.
    pub async fn lookup_player(&self, player_id: i64, proxy: Option<String>) -> Result<PlayerResult> {
        let (operation, reply) = Operation::player_lookup(player_id, proxy);
        self.queue.enqueue(operation.with_origin("lookup"))?;
        reply
            .await
            .map_err(|_| Error::queue(format!("lookup of player {player_id} was dropped")))
    }

    /// Queue a check for every alliance.
    pub async fn check_all_alliances(&self) -> Result<usize> {
        self.monitor.enqueue_all_checks().await
    }

    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.monitor.shutdown().await;
        self.queue.shutdown().await;

        self.cancellation_token.cancel();
        let logger = self.status_logger.lock().take();
        if let Some(logger) = logger
            && let Err(e) = logger.await
        {
            warn!("Status logger ended abnormally: {}", e);
        }

        info!("Closing database pool...");
        self.pool.close().await;
        info!("Shutdown complete");
    }
}
