use anyhow::Result;
use clap::Parser;
use stacforge_cli::Stacforge;
use stacforge_store::{ClientSecretProvider, Cloud, TokenCache};
use stacforge_telemetry::{AzureTableSink, Shipper, ShippingLayer, TableSink};
use std::sync::Arc;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let stacforge = Stacforge::parse();

    let fmt_layer = stacforge.log_level().map(|level| {
        tracing_subscriber::fmt::layer()
            .with_filter(tracing_subscriber::filter::LevelFilter::from_level(level))
    });
    let shipping_layer = table_sink().map(|sink| ShippingLayer::new(Shipper::spawn(sink)));
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(shipping_layer)
        .init();

    stacforge.run().await
}

/// The structured-log table sink, when a logs account and an identity
/// are configured.
fn table_sink() -> Option<Arc<dyn TableSink>> {
    let cloud = Cloud::from_env().ok()?;
    let provider = ClientSecretProvider::from_env(cloud).ok()?;
    let tokens = TokenCache::new(Arc::new(provider));
    AzureTableSink::from_env(cloud, tokens)
        .ok()
        .map(|sink| Arc::new(sink) as Arc<dyn TableSink>)
}
