//! `agentrelay-relay` — run the relay hub and any configured channel adapters.

use agentrelay_channels::ChannelAdapter;
use agentrelay_relay::config::load_config;
use agentrelay_relay::logging::init_tracing;
use agentrelay_relay::RelayServer;
use agentrelay_types::config::AdapterConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// Connect one configured adapter and log what it receives.
fn spawn_adapter(config: AdapterConfig) -> anyhow::Result<Arc<ChannelAdapter>> {
    let adapter = Arc::new(ChannelAdapter::from_config(config)?);
    let name = adapter.name().to_string();

    let n = name.clone();
    adapter
        .on_message(move |envelope| {
            info!(
                adapter = %n,
                message_type = %envelope.message_type,
                sender = %envelope.sender_id,
                "Envelope received"
            );
        })
        .detach();
    let n = name.clone();
    adapter
        .on_text_message(move |text, user| {
            info!(adapter = %n, user = user.unwrap_or("-"), chars = text.chars().count(), "Text received");
        })
        .detach();
    let n = name;
    adapter
        .on_error(move |e| warn!(adapter = %n, error = %e, "Adapter error"))
        .detach();

    let task = adapter.clone();
    tokio::spawn(async move {
        if let Err(e) = task.connect().await {
            warn!(adapter = %task.name(), error = %e, "Adapter failed to connect");
        }
    });
    Ok(adapter)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_filter = init_tracing();
    let config = load_config(None);
    if let Err(e) = log_filter.apply_level(&config.log_level) {
        warn!(level = %config.log_level, error = %e, "Invalid log_level, keeping default");
    }

    let server = RelayServer::bind(&config.relay).await?;
    let addr = server.local_addr()?;
    let serving = tokio::spawn(server.serve(async {
        let _ = tokio::signal::ctrl_c().await;
    }));
    info!(%addr, "agentrelay relay started");

    let mut adapters = Vec::new();
    for adapter_config in config.adapters {
        let name = adapter_config.name.clone();
        match spawn_adapter(adapter_config) {
            Ok(adapter) => adapters.push(adapter),
            Err(e) => warn!(adapter = %name, error = %e, "Skipping adapter"),
        }
    }

    serving.await??;

    for adapter in &adapters {
        let _ = adapter.disconnect().await;
    }
    info!("agentrelay relay shut down");
    Ok(())
}
