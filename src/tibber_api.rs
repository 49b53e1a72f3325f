use crate::error::ApiError;
use crate::model::{Home, PriceQuote};
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use serde_json::json;
use std::future::Future;
use tracing::debug;

const HOME_QUERY: &str = "query Home($id: ID!) { viewer { home(id: $id) { id appNickname timeZone \
    features { realTimeConsumptionEnabled } \
    currentSubscription { priceInfo { current { currency } } } } } }";

const PRICE_QUERY: &str = "query Price($id: ID!) { viewer { home(id: $id) { \
    currentSubscription { priceInfo { current { total energy tax currency startsAt level } } } } } }";

/// Request/response side of the Tibber API used by the bridge.
pub trait TibberApi: Send + Sync + 'static {
    fn fetch_home_by_id(
        &self,
        token: &str,
        home_id: &str,
    ) -> impl Future<Output = Result<Home, ApiError>> + Send;

    fn fetch_current_price(
        &self,
        token: &str,
        home_id: &str,
    ) -> impl Future<Output = Result<PriceQuote, ApiError>> + Send;
}

/// GraphQL client for `api.tibber.com`.
#[derive(Clone)]
pub struct TibberClient {
    endpoint_url: String,
    client: reqwest::Client,
}

impl TibberClient {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn query<T: DeserializeOwned>(
        &self,
        token: &str,
        query: &str,
        home_id: &str,
    ) -> Result<T, ApiError> {
        let response: GraphQlResponse<T> = self
            .client
            .post(&self.endpoint_url)
            .bearer_auth(token)
            .json(&json!({ "query": query, "variables": { "id": home_id } }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ApiError::GraphQl(message));
        }
        response
            .data
            .ok_or_else(|| ApiError::GraphQl("response carried no data".to_string()))
    }
}

impl TibberApi for TibberClient {
    async fn fetch_home_by_id(&self, token: &str, home_id: &str) -> Result<Home, ApiError> {
        debug!(home_id, "Fetching home");
        let data: ViewerData<HomeNode> = self.query(token, HOME_QUERY, home_id).await?;
        let node = data
            .viewer
            .home
            .ok_or_else(|| ApiError::HomeNotFound(home_id.to_string()))?;

        let currency = node
            .current_subscription
            .and_then(|s| s.price_info)
            .and_then(|p| p.current)
            .map(|c| c.currency)
            .unwrap_or_default();

        Ok(Home {
            id: node.id,
            name: node.app_nickname.unwrap_or_default(),
            currency,
            time_zone: node.time_zone.unwrap_or_default(),
            real_time_consumption_enabled: node
                .features
                .map(|f| f.real_time_consumption_enabled)
                .unwrap_or_default(),
        })
    }

    async fn fetch_current_price(
        &self,
        token: &str,
        home_id: &str,
    ) -> Result<PriceQuote, ApiError> {
        debug!(home_id, "Fetching current price");
        let data: ViewerData<PriceNode> = self.query(token, PRICE_QUERY, home_id).await?;
        data.viewer
            .home
            .and_then(|h| h.current_subscription)
            .and_then(|s| s.price_info)
            .and_then(|p| p.current)
            .ok_or_else(|| ApiError::PriceUnavailable(home_id.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ViewerData<T> {
    viewer: Viewer<T>,
}

#[derive(Debug, Deserialize)]
struct Viewer<T> {
    home: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HomeNode {
    id: String,
    app_nickname: Option<String>,
    time_zone: Option<String>,
    features: Option<HomeFeatures>,
    current_subscription: Option<Subscription<CurrencyOnly>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HomeFeatures {
    real_time_consumption_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct CurrencyOnly {
    currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceNode {
    current_subscription: Option<Subscription<PriceQuote>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Subscription<P> {
    price_info: Option<PriceInfo<P>>,
}

#[derive(Debug, Deserialize)]
struct PriceInfo<P> {
    current: Option<P>,
}
