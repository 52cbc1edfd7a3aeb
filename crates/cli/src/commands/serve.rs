//! `jarvis serve` — Start the gateway.

use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;

    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    println!("Jarvis gateway");
    println!("   WebSocket: ws://{}:{}/ws", config.gateway.host, config.gateway.port);
    println!("   Model:     {} ({})", config.llm.model, config.llm.provider);
    println!("   Protocol:  {:?}", config.llm.tool_protocol);
    println!("   Storage:   {:?}", config.storage.backend);

    jarvis_gateway::start(config).await?;

    Ok(())
}
