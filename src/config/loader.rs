//! Configuration Loader
//!
//! Layers defaults, an optional file and `EXTASK__` environment variables with
//! the `config` crate, then validates the result.

use super::error::{ConfigResult, ConfigurationError};
use super::HandlerConfig;
use config::{Config, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "EXTASK_CONFIG_PATH";

/// Prefix of environment overrides (`EXTASK__<FIELD>`)
pub const ENV_PREFIX: &str = "EXTASK";

/// Loaded and validated handler configuration
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: HandlerConfig,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load with the file named by `EXTASK_CONFIG_PATH`, if any
    pub fn load() -> ConfigResult<Self> {
        let path = env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from_file(path.as_deref())
    }

    /// Load with an explicit file; the file must exist when given
    pub fn load_from_file(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with_environment(path, None)
    }

    /// Load with an explicit set of environment variables instead of the
    /// process environment
    pub fn load_with_environment(
        path: Option<&Path>,
        environment: Option<HashMap<String, String>>,
    ) -> ConfigResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&HandlerConfig::default())?);

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::FileNotFound(path.to_path_buf()));
            }
            debug!(path = %path.display(), "📄 CONFIG: Adding configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(environment.map(|vars| vars.into_iter().collect())),
        );

        let config: HandlerConfig = builder.build()?.try_deserialize()?;
        let manager = Self::from_config(config)?;

        info!(
            worker_id = %manager.config.worker_id,
            source = ?path,
            "🔧 CONFIG: Handler configuration loaded"
        );

        Ok(Self {
            source_path: path.map(Path::to_path_buf),
            ..manager
        })
    }

    /// Wrap an already built configuration after validating it
    pub fn from_config(config: HandlerConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source_path: None,
        })
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn into_config(self) -> HandlerConfig {
        self.config
    }

    /// File the configuration was loaded from, if any
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}
