//! Coordinator server
//!
//! Wires the metadata store, storage-node transport and the periodic units
//! together, then serves the HTTP API until ctrl-c.

use crate::common::{timestamp_now, Config, Error, Result};
use crate::coordinator::events::{self, EventReceiver};
use crate::coordinator::health::HealthMonitor;
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::node_client::{HttpNodeClient, NodeTransport};
use crate::ops::{Reconciler, Verifier};
use crate::recovery::{Lane, RecoveryScheduler};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub struct Coordinator {
    config: Config,
    store: Arc<MetadataStore>,
    transport: Arc<dyn NodeTransport>,
    monitor: Arc<HealthMonitor>,
    reconciler: Arc<Reconciler>,
    verifier: Arc<Verifier>,
    scheduler: Arc<RecoveryScheduler>,
    events: Option<EventReceiver>,
}

impl Coordinator {
    /// Coordinator backed by RocksDB (or memory when no `db_path` is set)
    /// talking HTTP to storage nodes
    pub fn new(config: Config) -> Result<Self> {
        let store = match &config.coordinator.db_path {
            Some(path) => MetadataStore::open(path)?,
            None => {
                tracing::warn!("No db_path configured, metadata will not survive a restart");
                MetadataStore::in_memory()
            }
        };
        let transport = HttpNodeClient::new(config.coordinator.transfer_timeout())?;
        Self::with_parts(config, Arc::new(store), Arc::new(transport))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<MetadataStore>,
        transport: Arc<dyn NodeTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = events::channel();

        let monitor = HealthMonitor::new(Arc::clone(&store), config.health.clone())
            .with_events(tx.clone());
        let reconciler =
            Reconciler::new(Arc::clone(&store), Arc::clone(&transport)).with_events(tx.clone());
        let verifier = Verifier::new(Arc::clone(&store), Arc::clone(&transport)).with_events(tx);
        let scheduler = RecoveryScheduler::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            config.recovery.clone(),
        )?;

        Ok(Self {
            config,
            store,
            transport,
            monitor: Arc::new(monitor),
            reconciler: Arc::new(reconciler),
            verifier: Arc::new(verifier),
            scheduler: Arc::new(scheduler),
            events: Some(rx),
        })
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn verifier(&self) -> &Arc<Verifier> {
        &self.verifier
    }

    pub fn scheduler(&self) -> &Arc<RecoveryScheduler> {
        &self.scheduler
    }

    /// Cluster events not yet consumed. Taken by [`Coordinator::spawn_units`].
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    pub fn router(&self) -> Router {
        create_router(CoordState {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            monitor: Arc::clone(&self.monitor),
            reconciler: Arc::clone(&self.reconciler),
            verifier: Arc::clone(&self.verifier),
            scheduler: Arc::clone(&self.scheduler),
            default_replication_factor: self.config.coordinator.default_replication_factor,
        })
    }

    /// Start the event listener and every periodic unit
    pub fn spawn_units(&mut self, shutdown: &broadcast::Sender<()>) -> Result<Vec<JoinHandle<()>>> {
        let events = self
            .take_events()
            .ok_or_else(|| Error::Internal("cluster events already taken".into()))?;
        let mut handles = vec![tokio::spawn(
            Arc::clone(&self.scheduler).run_events(events, shutdown.subscribe()),
        )];

        let monitor = Arc::clone(&self.monitor);
        handles.push(spawn_periodic(
            "health-sweep",
            self.config.health.sweep_interval(),
            shutdown.subscribe(),
            move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    if let Err(e) = monitor.sweep(timestamp_now()) {
                        tracing::error!("Health sweep failed: {}", e);
                    }
                }
            },
        ));

        let reconciler = Arc::clone(&self.reconciler);
        handles.push(spawn_periodic(
            "reconciler",
            self.config.replication.reconcile_interval(),
            shutdown.subscribe(),
            move || {
                let reconciler = Arc::clone(&reconciler);
                async move {
                    if let Err(e) = reconciler.run_cycle(timestamp_now()).await {
                        tracing::error!("Reconciliation failed: {}", e);
                    }
                }
            },
        ));

        let verifier = Arc::clone(&self.verifier);
        handles.push(spawn_periodic(
            "verifier",
            self.config.replication.verify_interval(),
            shutdown.subscribe(),
            move || {
                let verifier = Arc::clone(&verifier);
                async move {
                    if let Err(e) = verifier.run_cycle(timestamp_now()).await {
                        tracing::error!("Verification failed: {}", e);
                    }
                }
            },
        ));

        let recovery = &self.config.recovery;
        for (name, period, lane) in [
            ("recovery-fast-path", recovery.fast_path_interval_secs, Lane::FastPath),
            ("recovery-main", recovery.main_interval_secs, Lane::Main),
        ] {
            let scheduler = Arc::clone(&self.scheduler);
            handles.push(spawn_periodic(
                name,
                Duration::from_secs(period),
                shutdown.subscribe(),
                move || {
                    let started = scheduler.dispatch(lane).len();
                    if started > 0 {
                        tracing::debug!(lane = ?lane, started, "Dispatched recovery tasks");
                    }
                    async {}
                },
            ));
        }

        let scheduler = Arc::clone(&self.scheduler);
        handles.push(spawn_periodic(
            "recovery-safety-sweep",
            Duration::from_secs(recovery.safety_sweep_interval_secs),
            shutdown.subscribe(),
            move || {
                scheduler.reassess();
                async {}
            },
        ));

        Ok(handles)
    }

    pub async fn serve(mut self) -> Result<()> {
        tracing::info!("Starting coordinator");
        tracing::info!("  HTTP API: {}", self.config.coordinator.bind_addr);
        match &self.config.coordinator.db_path {
            Some(path) => tracing::info!("  DB path: {}", path.display()),
            None => tracing::info!("  DB path: (in-memory)"),
        }
        tracing::info!(
            "  Heartbeat timeout: {}s",
            self.config.health.heartbeat_timeout_secs
        );

        // Rebuild the queue from metadata before anything else runs
        let queued = self.scheduler.reassess();
        tracing::info!(queued, "Initial recovery assessment complete");

        let (shutdown_tx, _) = broadcast::channel(1);
        let units = self.spawn_units(&shutdown_tx)?;

        let listener = tokio::net::TcpListener::bind(self.config.coordinator.bind_addr).await?;
        tracing::info!("✓ Coordinator ready");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
                tracing::info!("Shutdown requested");
            })
            .await?;

        let _ = shutdown_tx.send(());
        for unit in units {
            if let Err(e) = unit.await {
                tracing::warn!("Background unit ended abnormally: {}", e);
            }
        }
        self.store.flush()?;
        tracing::info!("Coordinator stopped");
        Ok(())
    }
}

/// Run `tick` every `period` until shutdown is signalled
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!(unit = name, "Periodic unit stopped");
    })
}
