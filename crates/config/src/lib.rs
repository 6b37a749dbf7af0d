//! Configuration loading and validation for agentd.
//!
//! Loads configuration from a TOML file (default `~/.agentd/config.toml`)
//! with environment variable overrides (`AGENTD_*`). Validates settings
//! at startup; secrets are redacted from `Debug` output.

use agentd_core::provider::{ProviderKind, ProviderSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Data root; sessions live under `<data_dir>/sessions/<id>/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Gateway configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Default provider selection for new sessions.
    #[serde(default)]
    pub default_provider: ProviderKind,

    /// Default provider settings for new sessions.
    #[serde(default = "default_provider_settings")]
    pub provider: ProviderSettings,

    /// Runtime limits and timeouts.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".agentd")
}

fn default_provider_settings() -> ProviderSettings {
    ProviderSettings {
        model: "gpt-4o-mini".into(),
        base_url: String::new(),
        api_key: None,
        temperature: 0.7,
        max_tokens: Some(4096),
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("data_dir", &self.data_dir)
            .field("gateway", &self.gateway)
            .field("default_provider", &self.default_provider)
            .field("provider.model", &self.provider.model)
            .field(
                "provider.api_key",
                &self.provider.api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("runtime", &self.runtime)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8421
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Runtime limits and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Cap on concurrently running turns across all sessions.
    /// 0 = `available_parallelism * 4`.
    #[serde(default)]
    pub max_concurrent_turns: usize,

    /// Tool call timeout (non-sandbox), seconds.
    #[serde(default = "default_tool_call_timeout")]
    pub tool_call_timeout_secs: u64,

    /// Sandbox code execution timeout, seconds.
    #[serde(default = "default_sandbox_timeout")]
    pub sandbox_timeout_secs: u64,

    /// Subprocess startup timeout (to Ready), seconds.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Reconnect attempts before a server is declared dead.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

fn default_tool_call_timeout() -> u64 {
    30
}
fn default_sandbox_timeout() -> u64 {
    5
}
fn default_startup_timeout() -> u64 {
    10
}
fn default_reconnect_attempts() -> u32 {
    3
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_turns: 0,
            tool_call_timeout_secs: default_tool_call_timeout(),
            sandbox_timeout_secs: default_sandbox_timeout(),
            startup_timeout_secs: default_startup_timeout(),
            reconnect_attempts: default_reconnect_attempts(),
        }
    }
}

impl RuntimeConfig {
    /// Resolve the effective turn budget.
    pub fn effective_turn_budget(&self) -> usize {
        if self.max_concurrent_turns > 0 {
            return self.max_concurrent_turns;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        cores * 4
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            gateway: GatewayConfig::default(),
            default_provider: ProviderKind::default(),
            provider: default_provider_settings(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl AppConfig {
    /// Default config file path: `~/.agentd/config.toml`.
    pub fn default_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }

    /// Load configuration: file (if present) then environment overrides.
    pub fn load(path: Option<&Path>) -> agentd_core::Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str(&raw).map_err(|e| agentd_core::Error::Config {
                message: format!("failed to parse {}: {e}", path.display()),
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `AGENTD_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("AGENTD_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(host) = std::env::var("AGENTD_HOST") {
            self.gateway.host = host;
        }
        if let Ok(port) = std::env::var("AGENTD_PORT") {
            if let Ok(port) = port.parse() {
                self.gateway.port = port;
            }
        }
        if let Ok(model) = std::env::var("AGENTD_MODEL") {
            self.provider.model = model;
        }
        if let Ok(url) = std::env::var("AGENTD_BASE_URL") {
            self.provider.base_url = url;
        }
    }

    fn validate(&self) -> agentd_core::Result<()> {
        if self.provider.model.is_empty() {
            return Err(agentd_core::Error::Config {
                message: "provider.model must not be empty".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(agentd_core::Error::Config {
                message: format!(
                    "provider.temperature {} out of range [0, 2]",
                    self.provider.temperature
                ),
            });
        }
        Ok(())
    }

    /// The directory that holds all session directories.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8421);
        assert_eq!(config.runtime.tool_call_timeout_secs, 30);
        assert_eq!(config.runtime.sandbox_timeout_secs, 5);
        assert_eq!(config.runtime.startup_timeout_secs, 10);
    }

    #[test]
    fn parse_partial_toml() {
        let raw = r#"
            [gateway]
            port = 9000

            [runtime]
            tool_call_timeout_secs = 10
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.runtime.tool_call_timeout_secs, 10);
        assert_eq!(config.runtime.reconnect_attempts, 3);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.provider.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn effective_turn_budget_defaults_to_cores() {
        let runtime = RuntimeConfig::default();
        assert!(runtime.effective_turn_budget() >= 4);

        let runtime = RuntimeConfig {
            max_concurrent_turns: 7,
            ..Default::default()
        };
        assert_eq!(runtime.effective_turn_budget(), 7);
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
