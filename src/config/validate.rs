// src/config/validate.rs

use crate::config::model::{EngineConfig, RawEngineConfig};
use crate::errors::ConfigError;

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = ConfigError;

    fn try_from(raw: RawEngineConfig) -> Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(EngineConfig::new_unchecked(raw.run, raw.executor, raw.logging))
    }
}

fn validate_raw_config(cfg: &RawEngineConfig) -> Result<(), ConfigError> {
    validate_run_section(cfg)?;
    validate_executor_section(cfg)?;
    Ok(())
}

fn validate_run_section(cfg: &RawEngineConfig) -> Result<(), ConfigError> {
    if cfg.run.name.trim().is_empty() {
        return Err(ConfigError::Invalid("[run].name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_executor_section(cfg: &RawEngineConfig) -> Result<(), ConfigError> {
    if cfg.executor.max_concurrency == Some(0) {
        return Err(ConfigError::Invalid(
            "[executor].max_concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> RawEngineConfig {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn valid_config_converts() {
        let cfg = EngineConfig::try_from(parse(
            "[run]\nname = \"nightly\"\n[executor]\nmax_concurrency = 2\n",
        ))
        .unwrap();
        assert_eq!(cfg.run_name(), "nightly");
        assert_eq!(cfg.execute_options().max_concurrency, Some(2));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = EngineConfig::try_from(parse("[executor]\nmax_concurrency = 0\n")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("max_concurrency")));
    }

    #[test]
    fn blank_run_name_is_rejected() {
        let err = EngineConfig::try_from(parse("[run]\nname = \"  \"\n")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("[run].name")));
    }
}
