//! Configuration management

use serde::Deserialize;
use std::path::Path;

/// Defaults for `invoke`, overridable from the command line
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_handler")]
    pub handler: String,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default = "default_function_name")]
    pub function_name: String,

    #[serde(default = "default_stdio")]
    pub stdout: String,

    #[serde(default = "default_stdio")]
    pub stderr: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handler: default_handler(),
            region: None,
            function_name: default_function_name(),
            stdout: default_stdio(),
            stderr: default_stdio(),
            timeout_ms: default_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

fn default_handler() -> String {
    lambdaspawn_runtime::supervisor::DEFAULT_HANDLER.to_string()
}

fn default_function_name() -> String {
    "lambdaspawn".to_string()
}

fn default_stdio() -> String {
    "inherit".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `lambdaspawn.toml` (or `file`) and `LAMBDASPAWN_*`
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        builder = match file {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("lambdaspawn").required(false)),
        };

        let config = builder
            .add_source(config::Environment::with_prefix("LAMBDASPAWN").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.handler, "index.handler");
        assert_eq!(config.stdout, "inherit");
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.region, None);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lambdaspawn.toml");
        std::fs::write(
            &path,
            "handler = \"app.main\"\nregion = \"eu-central-1\"\ntimeout_ms = 500\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.handler, "app.main");
        assert_eq!(config.region.as_deref(), Some("eu-central-1"));
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.stderr, "inherit");
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(Config::load(Some(Path::new("/nonexistent/lambdaspawn.toml"))).is_err());
    }
}
