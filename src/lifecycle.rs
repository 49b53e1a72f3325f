//! Process-wide lifecycle state.
//!
//! Each value has exactly one writer: the bridge owns the [`AppStateWriter`]
//! and the [`ConnectionStateMonitor`] owns the connection state writer.
//! Everything else reads through a cloneable [`LifecycleHandle`].

use tokio::sync::{mpsc::Receiver, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Starting,
    Running,
    StartupFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Transition notifications emitted by the stream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Connected,
    Disconnected,
    Terminated,
}

impl StreamState {
    /// Coarse mapping, `None` for transitions the lifecycle does not track
    pub fn connection_state(self) -> Option<ConnectionState> {
        match self {
            StreamState::Connected => Some(ConnectionState::Connected),
            StreamState::Disconnected => Some(ConnectionState::Disconnected),
            StreamState::Connecting | StreamState::Terminated => None,
        }
    }
}

pub struct AppStateWriter(watch::Sender<AppState>);

impl AppStateWriter {
    pub fn set(&self, state: AppState) {
        let previous = self.0.send_replace(state);
        if previous != state {
            info!(?previous, current = ?state, "App state changed");
        }
    }
}

pub struct ConnectionStateWriter(watch::Sender<ConnectionState>);

#[derive(Clone)]
pub struct LifecycleHandle {
    app: watch::Receiver<AppState>,
    connection: watch::Receiver<ConnectionState>,
}

impl LifecycleHandle {
    pub fn app_state(&self) -> AppState {
        *self.app.borrow()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.app_state() == AppState::Running
    }

    /// Resolves once the connection state equals `state`
    pub async fn wait_for_connection(&self, state: ConnectionState) {
        let mut rx = self.connection.clone();
        // Only fails if the monitor is gone, in which case nothing will change anymore
        let _ = rx.wait_for(|current| *current == state).await;
    }
}

/// Creates the lifecycle cells in their initial `Starting`/`Disconnected` state.
pub fn lifecycle() -> (AppStateWriter, ConnectionStateWriter, LifecycleHandle) {
    let (app_tx, app_rx) = watch::channel(AppState::Starting);
    let (conn_tx, conn_rx) = watch::channel(ConnectionState::Disconnected);
    (
        AppStateWriter(app_tx),
        ConnectionStateWriter(conn_tx),
        LifecycleHandle {
            app: app_rx,
            connection: conn_rx,
        },
    )
}

/// Translates stream state transitions into the process-wide connection state.
pub struct ConnectionStateMonitor {
    writer: ConnectionStateWriter,
}

impl ConnectionStateMonitor {
    pub fn new(writer: ConnectionStateWriter) -> Self {
        Self { writer }
    }

    /// Drains `states` until the queue closes or `cancel` fires
    pub async fn run(self, mut states: Receiver<StreamState>, cancel: CancellationToken) {
        info!("Starting connection state monitor");
        loop {
            let transition = tokio::select! {
                () = cancel.cancelled() => break,
                next = states.recv() => match next {
                    Some(transition) => transition,
                    None => break,
                },
            };
            self.apply(transition);
        }
        info!("Connection state monitor exiting");
    }

    fn apply(&self, transition: StreamState) {
        match transition.connection_state() {
            Some(state) => {
                let previous = self.writer.0.send_replace(state);
                if previous != state {
                    info!(?previous, current = ?state, "Connection state changed");
                }
            }
            None => debug!(?transition, "Ignoring stream transition"),
        }
    }
}
