use std::path::PathBuf;

use directories::BaseDirs;

use crate::config::ConfigError;

/// Directory holding herald's configuration.
///
/// `HERALD_HOME` wins when set; otherwise the platform config directory
/// (for example `~/.config/herald` on Linux).
pub fn herald_home_dir() -> Result<PathBuf, ConfigError> {
    if let Some(override_dir) = std::env::var_os("HERALD_HOME") {
        let path = PathBuf::from(override_dir);
        if path.is_relative() {
            return Err(ConfigError::Home(
                "HERALD_HOME must be an absolute path".to_string(),
            ));
        }
        return Ok(path);
    }

    let base = BaseDirs::new().ok_or_else(|| {
        ConfigError::Home("failed to resolve user home; set HERALD_HOME".to_string())
    })?;
    Ok(base.config_dir().join("herald"))
}

/// Config file location: `HERALD_CONFIG`, else `config.toml` in the home dir.
pub fn herald_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os("HERALD_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    Ok(herald_home_dir()?.join("config.toml"))
}
