use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration loaded from `~/.config/reseed/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReseedConfig {
    /// Concurrency window for pipeline fan-out stages.
    pub window: usize,
    /// Availability probe attempts per item. Few descriptors turn up after
    /// the third attempt, but busier trackers may warrant more.
    pub max_attempts: u32,
    /// Per-item descriptor download timeout in seconds.
    pub download_timeout_secs: u64,
    /// Optional bound on waiting for a reflector batch acknowledgement.
    #[serde(default)]
    pub completion_timeout_secs: Option<u64>,
    /// Address of the local content daemon's JSON socket.
    pub daemon_addr: String,
    /// Default reflector destinations, "host" or "host:port".
    #[serde(default)]
    pub destinations: Vec<String>,
}

impl Default for ReseedConfig {
    fn default() -> Self {
        Self {
            window: 10,
            max_attempts: 3,
            download_timeout_secs: 60,
            completion_timeout_secs: None,
            daemon_addr: "127.0.0.1:5279".to_string(),
            destinations: Vec::new(),
        }
    }
}

impl ReseedConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_secs.map(Duration::from_secs)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("reseed")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ReseedConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ReseedConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: ReseedConfig = toml::from_str(&data)?;
    Ok(cfg)
}
