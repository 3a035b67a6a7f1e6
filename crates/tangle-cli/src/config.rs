use std::{path::Path, str::FromStr};

use anyhow::Context;
use log::LevelFilter;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryConfigValue {
    #[default]
    Disable,
    Enable,
}

impl From<BinaryConfigValue> for bool {
    fn from(value: BinaryConfigValue) -> Self {
        value == BinaryConfigValue::Enable
    }
}

/// Settings read from the `--config` file, every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub log_level: Option<String>,
    pub print_extras: BinaryConfigValue,
    /// Refuse to run when the grammar has conflicts that are neither resolved by
    /// precedence nor declared.
    pub strict_conflicts: BinaryConfigValue,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config `{}`", path.display()))?;
        Config::parse(&text).with_context(|| format!("Invalid config `{}`", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Config> {
        let config: Config = serde_json::from_str(text)?;
        if let Some(level) = &config.log_level {
            LevelFilter::from_str(level)
                .with_context(|| format!("Expected a log level, got `{level}`"))?;
        }
        Ok(config)
    }

    /// `RUST_LOG` wins over the config file.
    pub fn level(&self) -> LevelFilter {
        std::env::var("RUST_LOG")
            .ok()
            .or_else(|| self.log_level.clone())
            .and_then(|level| LevelFilter::from_str(&level).ok())
            .unwrap_or(LevelFilter::Warn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_camel_case_and_optional() {
        let config = Config::parse(r#"{ "printExtras": "enable", "logLevel": "debug" }"#).unwrap();
        assert!(bool::from(config.print_extras));
        assert!(!bool::from(config.strict_conflicts));
        assert_eq!(config.log_level.as_deref(), Some("debug"));

        let config = Config::parse("{}").unwrap();
        assert!(!bool::from(config.print_extras));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(Config::parse(r#"{ "logLevel": "loud" }"#).is_err());
        assert!(Config::parse(r#"{ "strictConflicts": true }"#).is_err());
    }
}
