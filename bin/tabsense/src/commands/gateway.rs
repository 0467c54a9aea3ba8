use tabsense_core::Config;
use tabsense_gateway::Gateway;
use tracing::info;

use super::{base_dir, config_path};

pub async fn run(port: Option<u16>, host: Option<String>) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(&config_path())?;
    if let Some(port) = port {
        config.gateway.port = port;
    }
    if let Some(host) = host {
        config.gateway.host = host;
    }

    info!(
        port = config.gateway.port,
        host = %config.gateway.host,
        remote_debug_port = config.gateway.remote_debug_port,
        "starting gateway"
    );

    let gateway = Gateway::new(config).with_audit_dir(base_dir().join("audit"));
    gateway.run().await?;
    Ok(())
}
