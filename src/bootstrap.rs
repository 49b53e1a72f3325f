use crate::error::BridgeError;
use crate::model::Home;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::tibber_api::TibberApi;
use std::sync::Arc;
use tracing::{error, info};

/// Fetches the home metadata the subscription depends on, retrying a
/// bounded number of times.
pub struct HomeBootstrapper<A> {
    api: Arc<A>,
    policy: RetryPolicy,
}

impl<A: TibberApi> HomeBootstrapper<A> {
    pub fn new(api: Arc<A>, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    pub async fn bootstrap(&self, token: &str, home_id: &str) -> Result<Home, BridgeError> {
        let outcome = self
            .policy
            .run("Fetching home from Tibber", |_| {
                self.api.fetch_home_by_id(token, home_id)
            })
            .await;

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                info!(home_id = %value.id, attempts, "Home successfully fetched from Tibber");
                Ok(value)
            }
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                error!(home_id, attempts, error = %last_error, "Giving up fetching home");
                Err(BridgeError::BootstrapExhausted {
                    attempts,
                    source: last_error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::model::PriceQuote;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Fails the first `failures` calls, then returns a home.
    struct FlakyApi {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyApi {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl TibberApi for FlakyApi {
        async fn fetch_home_by_id(&self, token: &str, home_id: &str) -> Result<Home, ApiError> {
            assert_eq!(token, "token");
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(ApiError::GraphQl(format!("failure {call}")));
            }
            Ok(Home {
                id: home_id.to_string(),
                currency: "NOK".to_string(),
                ..Default::default()
            })
        }

        async fn fetch_current_price(&self, _: &str, _: &str) -> Result<PriceQuote, ApiError> {
            unreachable!("bootstrap never fetches prices")
        }
    }

    fn bootstrapper(api: Arc<FlakyApi>) -> HomeBootstrapper<FlakyApi> {
        HomeBootstrapper::new(api, RetryPolicy::new(10, Duration::from_secs(60)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_first_try() {
        let api = Arc::new(FlakyApi::new(0));
        let home = assert_ok!(bootstrapper(api.clone()).bootstrap("token", "H1").await);

        assert_eq!(home.id, "H1");
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_recovers() {
        let api = Arc::new(FlakyApi::new(9));
        let home = assert_ok!(bootstrapper(api.clone()).bootstrap("token", "H1").await);

        assert_eq!(home.currency, "NOK");
        assert_eq!(api.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_gives_up_after_ten_attempts() {
        let api = Arc::new(FlakyApi::new(u32::MAX));
        let err = assert_err!(bootstrapper(api.clone()).bootstrap("token", "H1").await);

        assert_eq!(api.calls.load(Ordering::SeqCst), 10);
        match err {
            BridgeError::BootstrapExhausted { attempts, source } => {
                assert_eq!(attempts, 10);
                assert_eq!(source.to_string(), "GraphQL error: failure 10");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
