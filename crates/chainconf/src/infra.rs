//! Infrastructure configuration - where things live and how to reach them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem layout for bundles, primers and generated artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Cache directory for downloaded model bundles.
    /// Default: bundles
    #[serde(default = "PathsConfig::default_bundles_dir")]
    pub bundles_dir: PathBuf,

    /// Directory searched for external primer files.
    /// Default: generated
    #[serde(default = "PathsConfig::default_primers_dir")]
    pub primers_dir: PathBuf,

    /// Directory stage outputs are written to.
    /// Default: generated
    #[serde(default = "PathsConfig::default_output_dir")]
    pub output_dir: PathBuf,
}

impl PathsConfig {
    fn default_bundles_dir() -> PathBuf {
        PathBuf::from("bundles")
    }

    fn default_primers_dir() -> PathBuf {
        PathBuf::from("generated")
    }

    fn default_output_dir() -> PathBuf {
        PathBuf::from("generated")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            bundles_dir: Self::default_bundles_dir(),
            primers_dir: Self::default_primers_dir(),
            output_dir: Self::default_output_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full EnvFilter string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Model service used to run each generation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL of the generation service.
    /// Default: http://127.0.0.1:2010
    #[serde(default = "GeneratorConfig::default_endpoint")]
    pub endpoint: String,

    /// Base URL bundles are downloaded from when missing locally.
    /// Default: http://download.magenta.tensorflow.org/models
    #[serde(default = "GeneratorConfig::default_bundle_base_url")]
    pub bundle_base_url: String,

    /// Request timeout in seconds. 0 disables the timeout; inference can take minutes.
    /// Default: 0
    #[serde(default)]
    pub timeout_secs: u64,
}

impl GeneratorConfig {
    fn default_endpoint() -> String {
        "http://127.0.0.1:2010".to_string()
    }

    fn default_bundle_base_url() -> String {
        "http://download.magenta.tensorflow.org/models".to_string()
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            bundle_base_url: Self::default_bundle_base_url(),
            timeout_secs: 0,
        }
    }
}
