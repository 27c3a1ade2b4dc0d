use cantabile_ports::settings::{ConfigError, EngineConfig};
use std::path::Path;

/// Reads the engine configuration from a JSON file. A missing file yields
/// the defaults; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(EngineConfig::default());
        }
        Err(err) => return Err(ConfigError::Io(err.to_string())),
    };
    let config: EngineConfig =
        serde_json::from_str(&content).map_err(|e| ConfigError::Serde(e.to_string()))?;
    tracing::debug!(path = %path.display(), soundfonts = config.soundfonts.len(), "config loaded");
    Ok(config)
}

pub fn save_config(path: &Path, config: &EngineConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
    }
    let content =
        serde_json::to_string_pretty(config).map_err(|e| ConfigError::Serde(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
}
