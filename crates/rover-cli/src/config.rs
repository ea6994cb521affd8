use std::time::Duration;

use anyhow::{Context, Result};
use rover_link::LinkConfig;
use rover_vision::camera::CameraConfig;
use rover_vision::policy::TrackingConfig;
use rover_vision::VisionConfig;

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub link: LinkConfig,
    pub vision: VisionConfig,
    pub tracking: TrackingConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Where the newest annotated frame is written. Unset keeps frames in memory only.
    pub snapshot_path: Option<String>,
    pub refresh_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { snapshot_path: None, refresh_ms: 30 }
    }
}

impl DisplayConfig {
    pub fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(1))
    }
}

/// Reads the TOML file if one is given; otherwise every section takes its defaults.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    let Some(path) = path else { return Ok(Config::default()) };
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

impl Config {
    pub fn apply_overrides(&mut self, camera_url: Option<String>, link_url: Option<String>) {
        if let Some(url) = camera_url {
            self.camera.url = url;
        }
        if let Some(url) = link_url {
            self.link.url = url;
        }
    }
}

pub fn check_display(cfg: &DisplayConfig) -> Result<()> {
    anyhow::ensure!(cfg.refresh_ms >= 1 && cfg.refresh_ms <= 1000, "display.refresh_ms should be 1..1000");
    if let Some(p) = &cfg.snapshot_path {
        anyhow::ensure!(!p.is_empty(), "display.snapshot_path is empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn no_file_means_defaults() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.camera.url, "http://192.168.4.1:1607/capture");
        assert_eq!(cfg.link.url, "ws://192.168.4.1:1606");
        assert_eq!(cfg.link.reconnect_backoff_ms, 2000);
        assert_eq!(cfg.tracking.target_class_id, 46);
        assert_eq!(cfg.tracking.center_tolerance_px, 80.0);
        assert_eq!(cfg.display.refresh_ms, 30);
        assert_eq!(cfg.vision.backend, "none");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
[camera]
url = "http://10.0.0.7/capture"

[tracking]
target_class_id = 0
start_enabled = true

[display]
snapshot_path = "/tmp/rover.png"
"#
        )
        .unwrap();

        let cfg = load_config(f.path().to_str()).unwrap();
        assert_eq!(cfg.camera.url, "http://10.0.0.7/capture");
        assert_eq!(cfg.camera.fetch_timeout_ms, 2000);
        assert_eq!(cfg.tracking.target_class_id, 0);
        assert!(cfg.tracking.start_enabled);
        assert_eq!(cfg.tracking.center_tolerance_px, 80.0);
        assert_eq!(cfg.display.snapshot_path.as_deref(), Some("/tmp/rover.png"));
        assert_eq!(cfg.link.keepalive_ms, 100);
    }

    #[test]
    fn bad_toml_is_reported() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[link]\nreconnect_backoff_ms = \"soon\"").unwrap();
        let err = load_config(f.path().to_str()).unwrap_err();
        assert!(format!("{err:#}").contains("parse config toml"));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(load_config(path.to_str()).is_err());
    }

    #[test]
    fn cli_urls_win_over_file() {
        let mut cfg = Config::default();
        cfg.apply_overrides(Some("http://cam/snap".into()), None);
        assert_eq!(cfg.camera.url, "http://cam/snap");
        assert_eq!(cfg.link.url, "ws://192.168.4.1:1606");

        cfg.apply_overrides(None, Some("ws://robot:9000".into()));
        assert_eq!(cfg.link.url, "ws://robot:9000");
    }

    #[test]
    fn display_check() {
        check_display(&DisplayConfig::default()).unwrap();
        assert!(check_display(&DisplayConfig { refresh_ms: 0, ..DisplayConfig::default() }).is_err());
    }
}
