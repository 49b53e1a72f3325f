use crate::lifecycle::LifecycleHandle;
use crate::model::{DomainReport, Home};
use crate::publisher::{BusTransport, Publisher};
use crate::tibber_api::TibberApi;
use chrono::Timelike;
use std::ops::{ControlFlow, RangeInclusive};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const PRICE_SERVICE: &str = "sensor_price";

/// What a poll tick does when it hits a fetch error or falls outside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPolicy {
    /// End the polling schedule
    Stop,
    /// Ignore this tick and keep polling
    Skip,
}

impl TickPolicy {
    pub fn from_stop_flag(stop: bool) -> Self {
        if stop {
            TickPolicy::Stop
        } else {
            TickPolicy::Skip
        }
    }
}

/// Why the poller stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    Cancelled,
    FetchFailed,
    OutsideWindow,
}

/// Wall clock source, swappable in tests.
pub trait Clock: Send + Sync + 'static {
    /// Minute of the current hour, 0..=59
    fn minute(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn minute(&self) -> u32 {
        chrono::Local::now().minute()
    }
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    pub window: RangeInclusive<u32>,
    pub error_policy: TickPolicy,
    pub window_policy: TickPolicy,
}

/// Periodically fetches the current price and publishes it as a sensor report.
pub struct Poller<A, C> {
    api: Arc<A>,
    clock: Arc<C>,
    token: String,
    home: watch::Receiver<Arc<Home>>,
    lifecycle: LifecycleHandle,
    settings: PollerSettings,
}

impl<A: TibberApi, C: Clock> Poller<A, C> {
    pub fn new(
        api: Arc<A>,
        clock: Arc<C>,
        token: impl Into<String>,
        home: watch::Receiver<Arc<Home>>,
        lifecycle: LifecycleHandle,
        settings: PollerSettings,
    ) -> Self {
        Self {
            api,
            clock,
            token: token.into(),
            home,
            lifecycle,
            settings,
        }
    }

    /// Runs the schedule. The first live tick comes one interval after start.
    pub async fn run<T: BusTransport>(
        self,
        publisher: Publisher<T>,
        cancel: CancellationToken,
    ) -> PollerExit {
        info!(interval_s = self.settings.interval.as_secs(), "Starting price poller");
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let exit = loop {
            tokio::select! {
                () = cancel.cancelled() => break PollerExit::Cancelled,
                _ = ticker.tick() => {}
            }
            if let ControlFlow::Break(exit) = self.tick(&publisher).await {
                break exit;
            }
        };
        info!(?exit, "Price poller exiting");
        exit
    }

    async fn tick<T: BusTransport>(&self, publisher: &Publisher<T>) -> ControlFlow<PollerExit> {
        let minute = self.clock.minute();
        if !self.settings.window.contains(&minute) {
            return match self.settings.window_policy {
                TickPolicy::Stop => {
                    info!(minute, "Outside polling window, stopping poller");
                    ControlFlow::Break(PollerExit::OutsideWindow)
                }
                TickPolicy::Skip => {
                    debug!(minute, "Outside polling window");
                    ControlFlow::Continue(())
                }
            };
        }

        if !self.lifecycle.is_running() {
            debug!(state = ?self.lifecycle.app_state(), "App not running, skipping price poll");
            return ControlFlow::Continue(());
        }

        let home_id = self.home.borrow().id.clone();
        match self.api.fetch_current_price(&self.token, &home_id).await {
            Ok(quote) => {
                publisher
                    .publish(&DomainReport::SensorReading {
                        home_id,
                        service: PRICE_SERVICE.to_string(),
                        value: quote.total,
                        unit: quote.currency,
                    })
                    .await;
                debug!("sensor_price sent");
                ControlFlow::Continue(())
            }
            Err(e) => {
                error!(error = %e, "Cannot get prices from Tibber");
                match self.settings.error_policy {
                    TickPolicy::Stop => ControlFlow::Break(PollerExit::FetchFailed),
                    TickPolicy::Skip => ControlFlow::Continue(()),
                }
            }
        }
    }
}
