//! Configuration loading for the relay daemon.

use agentrelay_types::config::AgentRelayConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "AGENTRELAY_CONFIG";

/// Load configuration from `path`, then `$AGENTRELAY_CONFIG`, then the
/// default location. A missing or unparseable file falls back to defaults.
pub fn load_config(path: Option<&Path>) -> AgentRelayConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return AgentRelayConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<AgentRelayConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                AgentRelayConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            AgentRelayConfig::default()
        }
    }
}

/// `~/.agentrelay/config.toml`
pub fn default_config_path() -> PathBuf {
    agentrelay_home().join("config.toml")
}

/// `~/.agentrelay`
pub fn agentrelay_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".agentrelay")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml")));
        assert_eq!(config.relay.listen_addr, "127.0.0.1:4850");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[relay]
listen_addr = "0.0.0.0:7000"
outbound_buffer = 32
"#
        )
        .unwrap();

        let config = load_config(Some(file.path()));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.relay.listen_addr, "0.0.0.0:7000");
        assert_eq!(config.relay.outbound_buffer, 32);
        assert!(config.relay.access_token_hash.is_none());
    }

    #[test]
    fn test_load_config_invalid_toml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is = = not toml").unwrap();
        let config = load_config(Some(file.path()));
        assert_eq!(config.relay.outbound_buffer, 256);
    }

    #[test]
    fn test_default_path() {
        assert!(default_config_path().ends_with(".agentrelay/config.toml"));
    }
}
