//! Generation defaults applied to every stage unless a schedule overrides them.

use serde::{Deserialize, Serialize};

/// Quarter notes per minute used when neither the primer nor the schedule sets a tempo.
pub const DEFAULT_QPM: f64 = 120.0;

/// Nudge applied at the primer/generation boundary so generators that start
/// on the following step still begin exactly where the primer ends.
pub const DEFAULT_BOUNDARY_EPSILON: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default: 120
    #[serde(default = "DefaultsConfig::default_qpm")]
    pub qpm: f64,

    /// Default: 0.00001
    #[serde(default = "DefaultsConfig::default_boundary_epsilon")]
    pub boundary_epsilon: f64,

    /// Generator configuration id used by stages that do not name one.
    /// Default: polyphony
    #[serde(default = "DefaultsConfig::default_generator_id")]
    pub generator_id: String,

    /// Allow stage outputs to replace files left by an earlier run.
    /// Default: false
    #[serde(default)]
    pub overwrite: bool,
}

impl DefaultsConfig {
    fn default_qpm() -> f64 {
        DEFAULT_QPM
    }

    fn default_boundary_epsilon() -> f64 {
        DEFAULT_BOUNDARY_EPSILON
    }

    fn default_generator_id() -> String {
        "polyphony".to_string()
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            qpm: Self::default_qpm(),
            boundary_epsilon: Self::default_boundary_epsilon(),
            generator_id: Self::default_generator_id(),
            overwrite: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = DefaultsConfig::default();
        assert_eq!(defaults.qpm, 120.0);
        assert_eq!(defaults.boundary_epsilon, 1e-5);
        assert_eq!(defaults.generator_id, "polyphony");
        assert!(!defaults.overwrite);
    }
}
