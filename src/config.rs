// Ambient configuration loading: `RoutingConfig` from a TOML file on disk,
// with environment overrides for the pieces operators tune most. Grounded
// on knhk-sidecar's config layer in the teacher's monorepo, which loads a
// TOML file into a typed struct with `Default` filling in anything absent.

use crate::routing::RoutingConfig;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// The on-disk shape of a routing config file; mirrors `RoutingConfig`
/// field-for-field but every field is optional so a config can override
/// only what it cares about (spec.md §6).
#[derive(Debug, Default, Deserialize)]
struct RoutingConfigFile {
    canary_threshold: Option<f64>,
    dual_verify_threshold: Option<f64>,
    direct_only_threshold: Option<f64>,
    canary_percentage: Option<f64>,
    direct_only_sample_rate: Option<f64>,
    shadow_mode_enabled: Option<bool>,
}

pub fn load_routing_config(path: impl AsRef<Path>) -> Result<RoutingConfig, ConfigError> {
    let path_ref = path.as_ref();
    let path_display = path_ref.display().to_string();

    let contents = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_display.clone(),
        source,
    })?;

    let file: RoutingConfigFile = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path_display,
        source,
    })?;

    let defaults = RoutingConfig::default();
    Ok(RoutingConfig {
        canary_threshold: file.canary_threshold.unwrap_or(defaults.canary_threshold),
        dual_verify_threshold: file
            .dual_verify_threshold
            .unwrap_or(defaults.dual_verify_threshold),
        direct_only_threshold: file
            .direct_only_threshold
            .unwrap_or(defaults.direct_only_threshold),
        canary_percentage: file.canary_percentage.unwrap_or(defaults.canary_percentage),
        direct_only_sample_rate: file
            .direct_only_sample_rate
            .unwrap_or(defaults.direct_only_sample_rate),
        shadow_mode_enabled: file
            .shadow_mode_enabled
            .unwrap_or(defaults.shadow_mode_enabled),
        node_overrides: defaults.node_overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_returns_read_error() {
        let err = load_routing_config("/nonexistent/vesper-routing.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("vesper-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("routing.toml");
        std::fs::write(&path, "canary_percentage = 0.25\n").unwrap();

        let config = load_routing_config(&path).unwrap();
        assert_eq!(config.canary_percentage, 0.25);
        assert_eq!(config.canary_threshold, RoutingConfig::default().canary_threshold);

        std::fs::remove_dir_all(&dir).ok();
    }
}
