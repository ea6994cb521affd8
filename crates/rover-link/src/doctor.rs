use anyhow::Result;

use crate::LinkConfig;

pub fn check_link(cfg: &LinkConfig) -> Result<()> {
    // built without TLS support: the robot serves plain ws on the local network
    anyhow::ensure!(cfg.url.starts_with("ws://"), "link.url must start with ws://: {}", cfg.url);
    anyhow::ensure!(cfg.reconnect_backoff_ms >= 100, "link.reconnect_backoff_ms too small; set >= 100");
    anyhow::ensure!(cfg.connect_timeout_ms >= 100, "link.connect_timeout_ms too small; set >= 100");
    anyhow::ensure!(cfg.keepalive_ms >= 10 && cfg.keepalive_ms <= 1000, "link.keepalive_ms should be 10..1000");
    Ok(())
}
