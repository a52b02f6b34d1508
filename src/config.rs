use eyre::{Result, WrapErr};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Tool configuration, loaded from a TOML file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub database: Database,
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineSettings {
    /// How many pending requests a student may hold at once.
    pub max_pending_requests: usize,
}

impl Default for EngineSettings {
    fn default() -> EngineSettings {
        EngineSettings {
            max_pending_requests: 5,
        }
    }
}

impl Config {
    pub fn load(file_name: &Path) -> Result<Config> {
        let text = fs::read_to_string(file_name).wrap_err_with(|| {
            format!("cannot load configuration file {}", file_name.display())
        })?;
        toml::from_str(&text).wrap_err("cannot parse configuration file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_configuration_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [database]
            url = "mysql://coordinator@localhost/projects"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_pending_requests, 5);
    }

    #[test]
    fn engine_limit_can_be_tuned() {
        let config: Config = toml::from_str(
            r#"
            [database]
            url = "sqlite://projects.db"

            [engine]
            max_pending_requests = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_pending_requests, 3);
    }
}
