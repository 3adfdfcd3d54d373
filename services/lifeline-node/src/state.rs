use anyhow::Context;
use std::sync::Arc;

use lifeline_core::{CancellationToken, Clock, LifelineConfig, NoResponders, Notifier, SystemClock, TracingNotifier};
use lifeline_dispatch::{
    refresh_queue, AlertFanout, DispatchEngine, DistressCoordinator, StraightLineRouteProvider, TrackingLoop,
};
use lifeline_escalation::EscalationEngine;
use lifeline_notify::{DriverRegistry, NotificationScheduler, PreferenceService};
use lifeline_store::SqliteStore;

pub struct AppState {
    pub config: LifelineConfig,
    pub store: Arc<SqliteStore>,
    pub coordinator: DistressCoordinator,
    pub dispatch: DispatchEngine,
    pub tracking: TrackingLoop,
    pub escalation: EscalationEngine,
    pub scheduler: NotificationScheduler,
    pub preferences: Arc<PreferenceService>,
    pub clock: Arc<dyn Clock>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire services over the configured SQLite database
    pub fn new(config: LifelineConfig) -> anyhow::Result<Self> {
        let path = config.storage.database_path.clone();
        let store = SqliteStore::open(&path).with_context(|| format!("failed to open store at {path}"))?;
        Self::with_store(config, Arc::new(store), Arc::new(SystemClock))
    }

    /// Wire services over an in-memory SQLite database
    pub fn in_memory(config: LifelineConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let store = SqliteStore::open_in_memory().context("failed to open in-memory store")?;
        Self::with_store(config, Arc::new(store), clock)
    }

    fn with_store(config: LifelineConfig, store: Arc<SqliteStore>, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
        let routes = Arc::new(
            StraightLineRouteProvider::new(config.dispatch.average_speed_kmh)
                .context("invalid dispatch.average_speed_kmh")?,
        );

        let fanout = Arc::new(AlertFanout::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
            &config.alerts,
        ));
        let coordinator = DistressCoordinator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(NoResponders),
            fanout.clone(),
            clock.clone(),
        );

        let (queue, receiver) = refresh_queue();
        let dispatch = DispatchEngine::new(
            store.clone(),
            store.clone(),
            routes.clone(),
            notifier.clone(),
            clock.clone(),
            queue,
            &config.dispatch,
        );
        let tracking = TrackingLoop::new(
            store.clone(),
            store.clone(),
            store.clone(),
            routes,
            fanout,
            clock.clone(),
            &config.tracking,
            config.dispatch.route_timeout(),
            receiver,
        );

        let escalation = EscalationEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            notifier,
            clock.clone(),
            config.escalation.clone(),
        );

        let preferences = Arc::new(PreferenceService::new(store.clone(), clock.clone()));
        let scheduler = NotificationScheduler::new(
            store.clone(),
            preferences.clone(),
            DriverRegistry::logging(),
            clock.clone(),
            &config.scheduler,
        );

        Ok(Self {
            config,
            store,
            coordinator,
            dispatch,
            tracking,
            escalation,
            scheduler,
            preferences,
            clock,
            shutdown: CancellationToken::new(),
        })
    }
}
