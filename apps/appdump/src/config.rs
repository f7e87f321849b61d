//! Dumper configuration.
//!
//! Configuration is stored as TOML:
//! - Linux/macOS: `~/.config/appdump/config.toml`
//! - Windows: `%APPDATA%/appdump/config.toml`

use std::path::{Path, PathBuf};

use appdump_protocol::constants::DEFAULT_BYPASS_SERVICE;
use appdump_session::AgentOps;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket URL of the instrumentation bridge.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Directory that receives one sub-directory per dumped application.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Process hosting the validation-bypass session.
    #[serde(default = "default_bypass_service")]
    pub bypass_service: String,

    /// Agent script injected into every session.
    #[serde(default = "default_agent_script")]
    pub agent_script: PathBuf,

    /// Names of the agent's exported operations.
    #[serde(default)]
    pub ops: AgentOps,
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:27042/bridge".into()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_bypass_service() -> String {
    DEFAULT_BYPASS_SERVICE.into()
}

fn default_agent_script() -> PathBuf {
    PathBuf::from("agent.js")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            output_dir: default_output_dir(),
            bypass_service: default_bypass_service(),
            agent_script: default_agent_script(),
            ops: AgentOps::default(),
        }
    }
}

impl Config {
    /// Loads the configuration named on the command line, or the default
    /// file. A missing default file is created; a missing explicit file
    /// is an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => {
                let path = config_path()?;
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    let config = Config::default();
                    config.save_to(&path)?;
                    Ok(config)
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Command-line flags take precedence over file values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.bridge {
            self.bridge_url = url.clone();
        }
        if let Some(dir) = &cli.output {
            self.output_dir = dir.clone();
        }
        if let Some(script) = &cli.agent {
            self.agent_script = script.clone();
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("appdump").join("config.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("appdump")
            .join("config.toml"))
    }
}
