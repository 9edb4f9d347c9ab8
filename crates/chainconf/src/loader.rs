//! Config file discovery, loading, and environment variable overlay.

use crate::{
    ChainConfig, ConfigError, DefaultsConfig, GeneratorConfig, PathsConfig, TelemetryConfig,
};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/chainsong/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("chainsong/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("chainsong.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<ChainConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from TOML string, expanding `~` and `$VAR` in paths.
fn parse_toml(contents: &str, path: &Path) -> Result<ChainConfig, ConfigError> {
    let mut config: ChainConfig =
        toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    config.paths.bundles_dir = expand_path(&config.paths.bundles_dir.to_string_lossy());
    config.paths.primers_dir = expand_path(&config.paths.primers_dir.to_string_lossy());
    config.paths.output_dir = expand_path(&config.paths.output_dir.to_string_lossy());

    Ok(config)
}

/// Pick the overlay value unless it is still the compiled default.
fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Merge two configs, with `overlay` taking precedence field by field.
///
/// A field in `overlay` that equals the compiled default is treated as unset.
pub fn merge_configs(base: ChainConfig, overlay: ChainConfig) -> ChainConfig {
    let paths = PathsConfig::default();
    let telemetry = TelemetryConfig::default();
    let generator = GeneratorConfig::default();
    let defaults = DefaultsConfig::default();

    ChainConfig {
        paths: PathsConfig {
            bundles_dir: pick(base.paths.bundles_dir, overlay.paths.bundles_dir, paths.bundles_dir),
            primers_dir: pick(base.paths.primers_dir, overlay.paths.primers_dir, paths.primers_dir),
            output_dir: pick(base.paths.output_dir, overlay.paths.output_dir, paths.output_dir),
        },
        telemetry: TelemetryConfig {
            log_level: pick(
                base.telemetry.log_level,
                overlay.telemetry.log_level,
                telemetry.log_level,
            ),
        },
        generator: GeneratorConfig {
            endpoint: pick(base.generator.endpoint, overlay.generator.endpoint, generator.endpoint),
            bundle_base_url: pick(
                base.generator.bundle_base_url,
                overlay.generator.bundle_base_url,
                generator.bundle_base_url,
            ),
            timeout_secs: pick(
                base.generator.timeout_secs,
                overlay.generator.timeout_secs,
                generator.timeout_secs,
            ),
        },
        defaults: DefaultsConfig {
            qpm: pick(base.defaults.qpm, overlay.defaults.qpm, defaults.qpm),
            boundary_epsilon: pick(
                base.defaults.boundary_epsilon,
                overlay.defaults.boundary_epsilon,
                defaults.boundary_epsilon,
            ),
            generator_id: pick(
                base.defaults.generator_id,
                overlay.defaults.generator_id,
                defaults.generator_id,
            ),
            overwrite: pick(
                base.defaults.overwrite,
                overlay.defaults.overwrite,
                defaults.overwrite,
            ),
        },
    }
}

/// Apply environment variable overrides to config.
///
/// Unparseable numeric or boolean values are ignored rather than clobbering the file value.
pub fn apply_env_overrides(config: &mut ChainConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

fn apply_overrides_from(
    config: &mut ChainConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let mut record = |key: &str| sources.env_overrides.push(key.to_string());

    if let Some(v) = lookup("CHAINSONG_BUNDLES_DIR") {
        config.paths.bundles_dir = expand_path(&v);
        record("CHAINSONG_BUNDLES_DIR");
    }
    if let Some(v) = lookup("CHAINSONG_PRIMERS_DIR") {
        config.paths.primers_dir = expand_path(&v);
        record("CHAINSONG_PRIMERS_DIR");
    }
    if let Some(v) = lookup("CHAINSONG_OUTPUT_DIR") {
        config.paths.output_dir = expand_path(&v);
        record("CHAINSONG_OUTPUT_DIR");
    }

    if let Some(v) = lookup("CHAINSONG_LOG_LEVEL") {
        config.telemetry.log_level = v;
        record("CHAINSONG_LOG_LEVEL");
    }
    // Also support RUST_LOG
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        record("RUST_LOG");
    }

    if let Some(v) = lookup("CHAINSONG_GENERATOR_ENDPOINT") {
        config.generator.endpoint = v;
        record("CHAINSONG_GENERATOR_ENDPOINT");
    }
    if let Some(v) = lookup("CHAINSONG_BUNDLE_BASE_URL") {
        config.generator.bundle_base_url = v;
        record("CHAINSONG_BUNDLE_BASE_URL");
    }
    if let Some(secs) = lookup("CHAINSONG_GENERATOR_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.generator.timeout_secs = secs;
        record("CHAINSONG_GENERATOR_TIMEOUT_SECS");
    }

    if let Some(qpm) = lookup("CHAINSONG_QPM").and_then(|v| v.parse().ok()) {
        config.defaults.qpm = qpm;
        record("CHAINSONG_QPM");
    }
    if let Some(epsilon) = lookup("CHAINSONG_BOUNDARY_EPSILON").and_then(|v| v.parse().ok()) {
        config.defaults.boundary_epsilon = epsilon;
        record("CHAINSONG_BOUNDARY_EPSILON");
    }
    if let Some(v) = lookup("CHAINSONG_GENERATOR_ID") {
        config.defaults.generator_id = v;
        record("CHAINSONG_GENERATOR_ID");
    }
    if let Some(v) = lookup("CHAINSONG_OVERWRITE") {
        config.defaults.overwrite = v.eq_ignore_ascii_case("true") || v == "1";
        record("CHAINSONG_OVERWRITE");
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
