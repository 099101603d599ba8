//! Layered configuration for the demo binary (spec.md §6: "Experiment harnesses may accept
//! command-line options..."). The core engine itself is configuration-free: everything it
//! needs is passed explicitly to [`crate::reconciliation::Reconciliation::new`].

use serde::Deserialize;

use crate::error::{CascadeError, Result};

/// Settings for one demo run: which variant to use, how to generate the noisy key, and its
/// size. Loaded from defaults, then an optional config file, then environment variables
/// prefixed `CASCADE_` (highest precedence), mirroring the layered-`config`-crate convention.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReconciliationConfig {
    pub variant: String,
    pub key_size: u32,
    pub estimated_bit_error_rate: f32,
    pub actual_bit_error_rate: f32,
    pub key_seed: Option<u64>,
    pub shuffle_seed: Option<u64>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        ReconciliationConfig {
            variant: "original".to_string(),
            key_size: 10_000,
            estimated_bit_error_rate: 0.01,
            actual_bit_error_rate: 0.01,
            key_seed: None,
            shuffle_seed: None,
        }
    }
}

impl ReconciliationConfig {
    /// Build a config from defaults, an optional config file (`cascade.toml`/`.yaml`/`.json`,
    /// resolved by the `config` crate's file-format auto-detection), and `CASCADE_`-prefixed
    /// environment variables, in that increasing order of precedence.
    pub fn load(config_file: Option<&str>) -> Result<ReconciliationConfig> {
        let defaults = ReconciliationConfig::default();
        let mut builder = ::config::Config::builder()
            .set_default("variant", defaults.variant.clone())
            .map_err(config_error)?
            .set_default("key_size", defaults.key_size as i64)
            .map_err(config_error)?
            .set_default("estimated_bit_error_rate", defaults.estimated_bit_error_rate as f64)
            .map_err(config_error)?
            .set_default("actual_bit_error_rate", defaults.actual_bit_error_rate as f64)
            .map_err(config_error)?;

        if let Some(path) = config_file {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }
        builder = builder.add_source(::config::Environment::with_prefix("CASCADE"));

        let settings = builder.build().map_err(config_error)?;
        settings
            .try_deserialize::<ReconciliationConfig>()
            .map_err(config_error)
    }
}

fn config_error(source: ::config::ConfigError) -> CascadeError {
    CascadeError::InvalidConfig(source.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_with_no_file_or_env() {
        let loaded = ReconciliationConfig::load(None).unwrap();
        assert_eq!(loaded, ReconciliationConfig::default());
    }
}
