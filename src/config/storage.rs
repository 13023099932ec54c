use crate::config::schema::EngineConfig;
use crate::error::{AutomationError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file location.
pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("browsion-automation"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("engine.toml")
}

/// Load the default configuration file. A missing file yields defaults.
/// Environment overrides are applied on top.
pub fn load_config() -> Result<EngineConfig> {
    let mut config = load_config_from(&get_config_path())?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load `path`; a missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", path);
        return Ok(EngineConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        AutomationError::Config(format!("Failed to read config from {:?}: {}", path, e))
    })?;

    let config: EngineConfig = toml::from_str(&content)?;

    tracing::info!("Loaded config from {:?}", path);
    Ok(config)
}

/// Write `config` to `path` as pretty TOML, creating parent directories.
pub fn save_config_to(path: &Path, config: &EngineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AutomationError::Config(format!(
                "Failed to create config directory {:?}: {}",
                parent, e
            ))
        })?;
    }

    let content = toml::to_string_pretty(config)?;

    fs::write(path, content).map_err(|e| {
        AutomationError::Config(format!("Failed to write config to {:?}: {}", path, e))
    })?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

pub fn apply_env_overrides(config: &mut EngineConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply `API_HOST`, `API_PORT`, `AUTOMATION_DRIVER_URL` and
/// `AUTOMATION_DRIVER_API_KEY` as returned by `lookup`.
pub fn apply_overrides_from<F>(config: &mut EngineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(host) = value("API_HOST") {
        config.api.host = host;
    }
    if let Some(port) = value("API_PORT") {
        match port.parse() {
            Ok(port) => config.api.port = port,
            Err(_) => tracing::warn!("Ignoring invalid API_PORT {:?}", port),
        }
    }
    if let Some(url) = value("AUTOMATION_DRIVER_URL") {
        config.driver.base_url = url;
    }
    if let Some(key) = value("AUTOMATION_DRIVER_API_KEY") {
        config.driver.api_key = Some(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_path() {
        let path = get_config_path();
        assert!(path.ends_with("engine.toml"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("missing-{}.toml", uuid::Uuid::new_v4()));
        assert_eq!(load_config_from(&path).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("automation-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("engine.toml");
        let mut config = EngineConfig::default();
        config.executor.max_attempts = 7;
        config.driver.api_key = Some("secret".to_string());
        save_config_to(&path, &config).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = std::env::temp_dir().join(format!("automation-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.toml");
        fs::write(&path, "[executor\nmax_attempts = ").unwrap();
        assert!(matches!(
            load_config_from(&path),
            Err(AutomationError::TomlDeserialize(_))
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("API_HOST", "0.0.0.0"),
            ("API_PORT", "9090"),
            ("AUTOMATION_DRIVER_URL", "http://driver:7000"),
            ("AUTOMATION_DRIVER_API_KEY", " "),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        apply_overrides_from(&mut config, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.driver.base_url, "http://driver:7000");
        assert!(config.driver.api_key.is_none());
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut config = EngineConfig::default();
        apply_overrides_from(&mut config, |k| (k == "API_PORT").then(|| "http".to_string()));
        assert_eq!(config.api.port, 8080);
    }
}
