use clap::Parser;
use sma_watch::{
    api,
    supervisor::{supervise, RESTART_DELAY},
    Config, ConnectionSlot, Connector, GatewayPath, GatewayQuery,
    ModbusTcpConnector, MySqlSink, Scheduler, SharedSnapshot, WebboxClient,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.verbose);
    config.validate()?;

    info!("SMA Watch monitors the Sunny Boy inverters");

    let snapshot = SharedSnapshot::new();

    // Web interface, independent of the acquisition loop
    let listener = api::bind(config.port).await?;
    let api_snapshot = snapshot.clone();
    tokio::spawn(async move {
        if let Err(e) = api::serve(listener, api_snapshot).await {
            error!("Web interface stopped: {e}");
        }
    });

    let groups = config.device_groups()?;
    let connector: Arc<dyn Connector> = Arc::new(ModbusTcpConnector::new(config.io_timeout()));
    let gateway = resolve_gateway(&config).await?;

    let sink = MySqlSink::new(&config.db_settings(), config.io_timeout());
    if let Err(e) = sink.ping().await {
        warn!("Error pinging the database: {e}");
    }

    let tick_period = config.tick_period();
    let flush_period = config.flush_ticks;
    supervise(RESTART_DELAY, || {
        let slots = groups
            .iter()
            .cloned()
            .map(|group| ConnectionSlot::new(group, connector.clone()))
            .collect();
        Scheduler::new(
            slots,
            gateway.clone(),
            Some(Box::new(sink.clone())),
            snapshot.clone(),
            tick_period,
            flush_period,
        )
        .run()
    })
    .await;

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Looks up the WebBox string inverter once for the life of the process.
async fn resolve_gateway(config: &Config) -> anyhow::Result<Option<GatewayPath>> {
    let client = match WebboxClient::new(&config.webbox_url, config.io_timeout()) {
        Ok(client) => client,
        Err(e) => {
            warn!("WebBox client unavailable, gateway strings disabled: {e}");
            return Ok(None);
        }
    };
    let query: Arc<dyn GatewayQuery> = Arc::new(client);
    Ok(GatewayPath::resolve(query, &config.webbox_device, config.gateway_sources()?).await)
}
