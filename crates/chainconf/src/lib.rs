//! Configuration loading for chainsong.
//!
//! Configuration is small and flat: where bundles, primers and outputs live,
//! how to reach the generation service, and the defaults every stage inherits.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/chainsong/config.toml` (system)
//! 2. `~/.config/chainsong/config.toml` (user)
//! 3. `./chainsong.toml` (local override, replaced by an explicit path if given)
//! 4. Environment variables (`CHAINSONG_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! bundles_dir = "~/.cache/chainsong/bundles"
//! primers_dir = "primers"
//! output_dir = "generated"
//!
//! [telemetry]
//! log_level = "info"
//!
//! [generator]
//! endpoint = "http://127.0.0.1:2010"
//!
//! [defaults]
//! qpm = 120.0
//! boundary_epsilon = 0.00001
//! generator_id = "polyphony"
//! ```

pub mod defaults;
pub mod infra;
pub mod loader;

pub use defaults::{DefaultsConfig, DEFAULT_BOUNDARY_EPSILON, DEFAULT_QPM};
pub use infra::{GeneratorConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Complete chainsong configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChainConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,
}

impl ChainConfig {
    /// Load configuration from all sources and report which files and env vars contributed.
    ///
    /// `config_path` replaces the local `./chainsong.toml` when given.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = ChainConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject values the windowing logic cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.defaults.qpm.is_finite() && self.defaults.qpm > 0.0) {
            return Err(ConfigError::Invalid {
                key: "defaults.qpm".to_string(),
                message: format!("must be a positive number, got {}", self.defaults.qpm),
            });
        }
        if !(self.defaults.boundary_epsilon.is_finite() && self.defaults.boundary_epsilon >= 0.0) {
            return Err(ConfigError::Invalid {
                key: "defaults.boundary_epsilon".to_string(),
                message: format!(
                    "must be zero or positive, got {}",
                    self.defaults.boundary_epsilon
                ),
            });
        }
        if self.defaults.generator_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "defaults.generator_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for stable ordering and comments
        let mut output = String::new();

        output.push_str("# chainsong configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "bundles_dir = \"{}\"\n",
            self.paths.bundles_dir.display()
        ));
        output.push_str(&format!(
            "primers_dir = \"{}\"\n",
            self.paths.primers_dir.display()
        ));
        output.push_str(&format!(
            "output_dir = \"{}\"\n",
            self.paths.output_dir.display()
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output.push_str("\n[generator]\n");
        output.push_str(&format!("endpoint = \"{}\"\n", self.generator.endpoint));
        output.push_str(&format!(
            "bundle_base_url = \"{}\"\n",
            self.generator.bundle_base_url
        ));
        output.push_str(&format!("timeout_secs = {}\n", self.generator.timeout_secs));

        output.push_str("\n[defaults]\n");
        output.push_str(&format!("qpm = {:?}\n", self.defaults.qpm));
        output.push_str(&format!(
            "boundary_epsilon = {:?}\n",
            self.defaults.boundary_epsilon
        ));
        output.push_str(&format!(
            "generator_id = \"{}\"\n",
            self.defaults.generator_id
        ));
        output.push_str(&format!("overwrite = {}\n", self.defaults.overwrite));

        output
    }
}
