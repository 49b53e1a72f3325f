use crate::bootstrap::HomeBootstrapper;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::lifecycle::{
    lifecycle, AppState, AppStateWriter, ConnectionStateMonitor, LifecycleHandle,
};
use crate::model::Home;
use crate::poller::{Clock, Poller, PollerExit, PollerSettings};
use crate::publisher::{BusTransport, Publisher};
use crate::retry::RetryPolicy;
use crate::router::MessageRouter;
use crate::stream::MeasurementFeed;
use crate::tibber_api::TibberApi;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wires bootstrap, subscription, state monitor and poller together.
pub struct Bridge;

impl Bridge {
    /// Bootstraps the home, then spawns the three long-running tasks.
    /// Fails without spawning anything if the home cannot be fetched.
    pub async fn start<A, F, T, C>(
        config: &BridgeConfig,
        api: Arc<A>,
        feed: &F,
        transport: T,
        clock: Arc<C>,
    ) -> Result<BridgeHandle, BridgeError>
    where
        A: TibberApi,
        F: MeasurementFeed,
        T: BusTransport,
        C: Clock,
    {
        info!(home_id = %config.home_id, "Starting Tibber bridge");
        let (app, connection, lifecycle) = lifecycle();

        let bootstrapper = HomeBootstrapper::new(
            api.clone(),
            RetryPolicy::new(config.bootstrap_attempts, config.bootstrap_delay),
        );
        let home = match bootstrapper.bootstrap(&config.token, &config.home_id).await {
            Ok(home) => home,
            Err(e) => {
                app.set(AppState::StartupFailed);
                return Err(e);
            }
        };
        let home_id = home.id.clone();
        let (home_tx, home_rx) = watch::channel(Arc::new(home));
        app.set(AppState::Running);

        let cancel = CancellationToken::new();
        let subscription = feed.open_subscription(&config.token, &home_id, cancel.child_token());
        let publisher = Publisher::new(transport);

        let router = tokio::spawn(MessageRouter::new(home_id).run(
            subscription.events,
            publisher.clone(),
            cancel.clone(),
        ));
        let monitor = tokio::spawn(
            ConnectionStateMonitor::new(connection).run(subscription.states, cancel.clone()),
        );
        let poller = Poller::new(
            api,
            clock,
            config.token.clone(),
            home_rx.clone(),
            lifecycle.clone(),
            PollerSettings {
                interval: config.poll_interval,
                window: config.poll_window_minutes.0..=config.poll_window_minutes.1,
                error_policy: config.poll_error_policy,
                window_policy: config.poll_window_policy,
            },
        );
        let poller = tokio::spawn(poller.run(publisher, cancel.clone()));

        info!("All bridge tasks started");
        Ok(BridgeHandle {
            lifecycle,
            home: home_rx,
            cancel,
            router,
            monitor,
            poller,
            _app: app,
            _home: home_tx,
        })
    }
}

/// Supervises the running bridge tasks.
pub struct BridgeHandle {
    lifecycle: LifecycleHandle,
    home: watch::Receiver<Arc<Home>>,
    cancel: CancellationToken,
    router: JoinHandle<()>,
    monitor: JoinHandle<()>,
    poller: JoinHandle<PollerExit>,
    _app: AppStateWriter,
    _home: watch::Sender<Arc<Home>>,
}

impl BridgeHandle {
    pub fn lifecycle(&self) -> LifecycleHandle {
        self.lifecycle.clone()
    }

    pub fn home(&self) -> Arc<Home> {
        self.home.borrow().clone()
    }

    /// True once the price schedule has ended, e.g. after a failed fetch
    /// under the stop policy. The measurement stream keeps running.
    pub fn is_poller_finished(&self) -> bool {
        self.poller.is_finished()
    }

    /// Cancels every task and waits for them to finish
    pub async fn shutdown(self) {
        info!("Shutting down bridge");
        self.cancel.cancel();
        self.join().await;
    }

    /// Waits for all tasks. Without a cancel this only returns once the
    /// subscription has terminated and the poller has stopped.
    pub async fn join(self) {
        if let Err(e) = self.router.await {
            error!(error = %e, "Router task failed");
        }
        if let Err(e) = self.monitor.await {
            error!(error = %e, "State monitor task failed");
        }
        match self.poller.await {
            Ok(exit) => info!(?exit, "Poller finished"),
            Err(e) => error!(error = %e, "Poller task failed"),
        }
    }
}
