use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub notices: NoticesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout for the non-streaming calls. The answer stream itself
    /// is long-lived and only gets the connect timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5001".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct NoticesConfig {
    /// "auto" (tty-dependent), "human", "json", or "off".
    #[serde(default = "default_notice_mode")]
    pub mode: String,
}

impl Default for NoticesConfig {
    fn default() -> Self {
        Self {
            mode: default_notice_mode(),
        }
    }
}

fn default_notice_mode() -> String {
    "auto".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate service
    if config.service.base_url.trim().is_empty() {
        anyhow::bail!("service.base_url must not be empty");
    }
    if !config.service.base_url.starts_with("http://")
        && !config.service.base_url.starts_with("https://")
    {
        anyhow::bail!("service.base_url must start with http:// or https://");
    }
    if config.service.timeout_secs == 0 {
        anyhow::bail!("service.timeout_secs must be > 0");
    }

    // Validate notices
    match config.notices.mode.as_str() {
        "auto" | "human" | "json" | "off" => {}
        other => anyhow::bail!(
            "Unknown notices mode: '{}'. Must be auto, human, json, or off.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.service.base_url, "http://localhost:5001");
        assert_eq!(config.service.timeout_secs, 30);
        assert_eq!(config.notices.mode, "auto");
    }

    #[test]
    fn loads_and_validates_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[service]\nbase_url = \"https://justice.example.com\"\ntimeout_secs = 5\n\n[notices]\nmode = \"json\"\n"
        )
        .unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.service.base_url, "https://justice.example.com");
        assert_eq!(config.notices.mode, "json");
    }

    #[test]
    fn rejects_bad_mode_and_bad_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[notices]\nmode = \"loud\"\n").unwrap();
        assert!(load_config(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[service]\nbase_url = \"ftp://x\"\n").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
