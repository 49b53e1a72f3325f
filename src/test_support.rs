//! In-memory stand-ins for the external collaborators, shared by unit tests.

use crate::error::{ApiError, PublishError};
use crate::model::{Home, PriceQuote};
use crate::poller::Clock;
use crate::publisher::BusTransport;
use crate::tibber_api::TibberApi;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct RecordingTransport {
    messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    attempts: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    stall: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        let transport = Self::default();
        transport.fail.store(true, Ordering::Relaxed);
        transport
    }

    /// Every publish hangs forever, like a broker that never answers
    pub fn stalled() -> Self {
        let transport = Self::default();
        transport.stall.store(true, Ordering::Relaxed);
        transport
    }

    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl BusTransport for RecordingTransport {
    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if self.stall.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::Relaxed) {
            return Err(PublishError::Closed);
        }
        self.messages.lock().unwrap().push((topic, payload));
        Ok(())
    }
}

pub struct FakeApi {
    price: Option<PriceQuote>,
    home_failures: u32,
    home_calls: AtomicU32,
    price_calls: AtomicU32,
}

impl FakeApi {
    pub fn with_price(total: f64, currency: &str) -> Self {
        Self {
            price: Some(PriceQuote {
                total,
                currency: currency.to_string(),
                ..Default::default()
            }),
            home_failures: 0,
            home_calls: AtomicU32::new(0),
            price_calls: AtomicU32::new(0),
        }
    }

    pub fn failing_price() -> Self {
        Self {
            price: None,
            ..Self::with_price(0.0, "")
        }
    }

    /// Fails the first `failures` home fetches
    pub fn with_home_failures(mut self, failures: u32) -> Self {
        self.home_failures = failures;
        self
    }

    pub fn home_calls(&self) -> u32 {
        self.home_calls.load(Ordering::SeqCst)
    }

    pub fn price_calls(&self) -> u32 {
        self.price_calls.load(Ordering::SeqCst)
    }
}

impl TibberApi for FakeApi {
    async fn fetch_home_by_id(&self, _token: &str, home_id: &str) -> Result<Home, ApiError> {
        let call = self.home_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.home_failures {
            return Err(ApiError::HomeNotFound(home_id.to_string()));
        }
        Ok(Home {
            id: home_id.to_string(),
            currency: "NOK".to_string(),
            ..Default::default()
        })
    }

    async fn fetch_current_price(
        &self,
        _token: &str,
        home_id: &str,
    ) -> Result<PriceQuote, ApiError> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        self.price
            .clone()
            .ok_or_else(|| ApiError::PriceUnavailable(home_id.to_string()))
    }
}

pub struct FixedClock(AtomicU32);

impl FixedClock {
    pub fn new(minute: u32) -> Self {
        Self(AtomicU32::new(minute))
    }

    pub fn set(&self, minute: u32) {
        self.0.store(minute, Ordering::Relaxed);
    }
}

impl Clock for FixedClock {
    fn minute(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}
