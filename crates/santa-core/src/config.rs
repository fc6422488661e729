// Configuration loading and parsing (config/santa.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::draw::DrawGenerator;

/// File name shared by `defaults/` and `config/`.
pub const CONFIG_FILE_NAME: &str = "santa.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for santa.toml.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    server: ServerConfig,
    database: DatabaseSection,
    draw: DrawConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub db_path: String,
    pub draw: DrawConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Raise the default log level to `debug`.
    #[serde(default)]
    pub debug: bool,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrawConfig {
    /// Randomized attempts before a list is declared impossible to draw.
    pub max_attempts: u32,
    /// How many draws the latest-draws listing returns.
    pub latest_draws_limit: usize,
}

impl DrawConfig {
    /// Build the generator for this budget.
    pub fn generator(&self) -> Result<DrawGenerator, ConfigError> {
        DrawGenerator::try_new(self.max_attempts).map_err(|e| ConfigError::ValidationError {
            field: "draw.max_attempts".into(),
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/santa.toml` relative to `base_dir`.
///
/// Does not seed missing files; prefer `load_config()` for that.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    load_config_file(&base_dir.join("config").join(CONFIG_FILE_NAME))
}

/// Load and validate a single config file at `path`.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let text = read_file(path)?;
    let config = parse_config(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

fn parse_config(text: &str) -> Result<Config, toml::de::Error> {
    let file: ConfigFile = toml::from_str(text)?;
    Ok(Config {
        server: file.server,
        db_path: file.database.path,
        draw: file.draw,
    })
}

/// Seed `config/santa.toml` from `defaults/santa.toml` when it is missing.
///
/// Returns the path written, if any. A config that already exists is left
/// alone, and so is a tree that ships `config/` without `defaults/`.
pub fn ensure_config_files(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let seed = base_dir.join("defaults").join(CONFIG_FILE_NAME);
    let config_dir = base_dir.join("config");
    let target = config_dir.join(CONFIG_FILE_NAME);

    if target.exists() {
        return Ok(None);
    }
    if !seed.is_file() {
        if config_dir.is_dir() {
            return Ok(None);
        }
        return Err(seed_error(format!(
            "no {} in {}; start from the project root",
            Path::new("defaults").join(CONFIG_FILE_NAME).display(),
            base_dir.display()
        )));
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| seed_error(format!("cannot create {}: {e}", config_dir.display())))?;
    std::fs::copy(&seed, &target).map_err(|e| {
        seed_error(format!(
            "cannot copy {} to {}: {e}",
            seed.display(),
            target.display()
        ))
    })?;

    Ok(Some(target))
}

fn seed_error(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

/// Loads config relative to the current working directory, seeding
/// `config/` from `defaults/` first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.host.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "server.host".into(),
            message: "must not be empty".into(),
        });
    }

    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    config.draw.generator()?;

    if config.draw.latest_draws_limit == 0 {
        return Err(ConfigError::ValidationError {
            field: "draw.latest_draws_limit".into(),
            message: "must be greater than 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
