// Configuration management module
// Handles the TOML configuration file and the application base directory

pub mod settings;

#[cfg(test)]
mod tests;

pub use settings::{
    Config, ConfigError, EmbeddingFailurePolicy, IndexingConfig, OllamaConfig,
};

/// Environment variable that overrides the default base directory
pub const BASE_DIR_ENV: &str = "DOCSEEK_HOME";

/// Get the default application base directory
///
/// `DOCSEEK_HOME` wins when set; otherwise `~/.docseek`.
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os(BASE_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(std::path::PathBuf::from(dir));
    }
    Config::default_base_dir()
}
