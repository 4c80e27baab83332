//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use secrecy::SecretString;
use std::path::Path;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Environment has the highest precedence
    dotenvy::dotenv().ok();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().map_or(false, |ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().map_or(false, |ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// `lookup` is `std::env::var` in production; tests pass a map.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = lookup("DISCORD_TOKEN").or_else(|| lookup("DISCORDWAVE_TOKEN")) {
        config.token = Some(SecretString::from(token));
    }
    if let Some(url) = lookup("DISCORDWAVE_GATEWAY_URL") {
        config.gateway.url = Some(url);
    }
    if let Some(intents) = lookup("DISCORDWAVE_INTENTS") {
        config.gateway.intents = intents.parse()?;
    }
    if let Some(prefix) = lookup("DISCORDWAVE_PREFIX") {
        config.commands.prefix = prefix;
    }
    if let Some(api_base) = lookup("DISCORDWAVE_API_BASE") {
        config.rest.api_base = api_base;
    }
    if let Some(attempts) = lookup("DISCORDWAVE_MAX_RECONNECTS") {
        config.reconnect.max_attempts = match attempts.trim() {
            "" | "none" | "unlimited" => None,
            value => Some(value.parse().map_err(|e| {
                Error::Config(format!("Invalid DISCORDWAVE_MAX_RECONNECTS: {}", e))
            })?),
        };
    }
    if let Some(level) = lookup("RUST_LOG") {
        config.log.level = level;
    }
    if let Some(format) = lookup("LOG_FORMAT") {
        config.log.format = format;
    }

    Ok(())
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().map_or(false, |ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Intents;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_config.json");

        let mut config = Config::default();
        config.commands.prefix = "?".to_string();
        config.token = Some(SecretString::from("never-written"));
        save_config(&config, &path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("never-written"));

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.commands.prefix, "?");
        assert!(loaded.token.is_none());
    }

    #[test]
    fn test_load_toml_with_protocol_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [gateway]
            url = "wss://gateway.example.test"
            handshake_timeout = "10s"
            intents = ["guilds", "guild_messages", "message_content"]

            [protocol.close_codes]
            fatal = [4004]
            reidentify = [4007, 4009, 4900]
            "#,
        )
        .unwrap();

        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.gateway.url.as_deref(), Some("wss://gateway.example.test"));
        assert_eq!(config.gateway.handshake_timeout, Duration::from_secs(10));
        assert!(config.gateway.intents.contains(Intents::MESSAGE_CONTENT));
        assert_eq!(config.protocol.close_codes.reidentify, vec![4007, 4009, 4900]);
        assert!(config.protocol.close_codes.resume_unknown);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DISCORD_TOKEN", "abc.def"),
            ("DISCORDWAVE_INTENTS", "guilds,message_content"),
            ("DISCORDWAVE_PREFIX", "$"),
            ("DISCORDWAVE_MAX_RECONNECTS", "unlimited"),
        ]);

        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.token.as_ref().unwrap().expose_secret(), "abc.def");
        assert_eq!(config.gateway.intents, Intents::GUILDS | Intents::MESSAGE_CONTENT);
        assert_eq!(config.commands.prefix, "$");
        assert_eq!(config.reconnect.max_attempts, None);
    }

    #[test]
    fn test_env_override_rejects_bad_intents() {
        let mut config = Config::default();
        let result = apply_env_overrides(&mut config, |key| {
            (key == "DISCORDWAVE_INTENTS").then(|| "guilds,mind_reading".to_string())
        });
        assert!(result.is_err());
    }
}
