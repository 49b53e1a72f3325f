use std::sync::Arc;
use tibber_fimp_bridge::{
    poller::SystemClock, Bridge, BridgeConfig, MqttTransport, TibberClient, TibberLiveFeed,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Tibber FIMP bridge");
    let config = BridgeConfig::from_env()?;

    let mqtt_cancel = CancellationToken::new();
    let (transport, mqtt_driver) = MqttTransport::connect(&config.mqtt, mqtt_cancel.clone());

    let api = Arc::new(TibberClient::new(&config.api_url));
    let feed = TibberLiveFeed::new(&config.ws_url)
        .with_queue_sizes(config.event_queue_size, config.state_queue_size);

    // Startup failure is fatal, the bridge never runs without a home
    let bridge = Bridge::start(&config, api, &feed, transport, Arc::new(SystemClock)).await?;
    info!(home_id = %bridge.home().id, "Bridge running");

    tokio::signal::ctrl_c().await?;
    bridge.shutdown().await;
    mqtt_cancel.cancel();
    mqtt_driver.await?;
    Ok(())
}
