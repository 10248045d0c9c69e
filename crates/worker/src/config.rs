use std::path::PathBuf;

use labelwork_core::resolution::{MatrixOptions, ResolutionOptions};

/// Log output format of the worker process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a boolean, got '{value}'")]
    InvalidBool { var: &'static str, value: String },

    #[error("LOG_FORMAT must be 'plain' or 'json', got '{0}'")]
    InvalidLogFormat(String),
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// JSON snapshot the in-memory store is loaded from.
    pub snapshot_path: PathBuf,
    /// Where the updated snapshot is written after a command, if anywhere.
    pub output_path: Option<PathBuf>,
    pub resolution: ResolutionOptions,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default          |
    /// |----------------------------|------------------|
    /// | `SNAPSHOT_PATH`            | `labelwork.json` |
    /// | `OUTPUT_PATH`              | unset            |
    /// | `STRICT_RESOLUTION`        | `false`          |
    /// | `RESOLVE_IGNORE_HIERARCHY` | `false`          |
    /// | `RESOLVE_IGNORE_REPEAT`    | `false`          |
    /// | `LOG_FORMAT`               | `plain`          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let snapshot_path = lookup("SNAPSHOT_PATH")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "labelwork.json".into())
            .into();

        let output_path = lookup("OUTPUT_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let flag = |var: &'static str| -> Result<bool, ConfigError> {
            match lookup(var) {
                None => Ok(false),
                Some(value) => parse_bool(&value)
                    .ok_or(ConfigError::InvalidBool { var, value }),
            }
        };

        let resolution = ResolutionOptions {
            matrix: MatrixOptions {
                ignore_hierarchy: flag("RESOLVE_IGNORE_HIERARCHY")?,
                ignore_repeat: flag("RESOLVE_IGNORE_REPEAT")?,
            },
            strict: flag("STRICT_RESOLUTION")?,
            ..Default::default()
        };

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("plain") => LogFormat::Plain,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(ConfigError::InvalidLogFormat(other.to_string())),
        };

        Ok(Self {
            snapshot_path,
            output_path,
            resolution,
            log_format,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.snapshot_path, PathBuf::from("labelwork.json"));
        assert!(config.output_path.is_none());
        assert_eq!(config.resolution, ResolutionOptions::default());
        assert_eq!(config.log_format, LogFormat::Plain);
    }

    #[test]
    fn flags_and_paths() {
        let config = load(&[
            ("SNAPSHOT_PATH", "/data/in.json"),
            ("OUTPUT_PATH", "/data/out.json"),
            ("STRICT_RESOLUTION", "true"),
            ("RESOLVE_IGNORE_REPEAT", "1"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.output_path, Some(PathBuf::from("/data/out.json")));
        assert!(config.resolution.strict);
        assert!(config.resolution.matrix.ignore_repeat);
        assert!(!config.resolution.matrix.ignore_hierarchy);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert_matches!(
            load(&[("STRICT_RESOLUTION", "maybe")]),
            Err(ConfigError::InvalidBool { var: "STRICT_RESOLUTION", .. })
        );
        assert_matches!(
            load(&[("LOG_FORMAT", "xml")]),
            Err(ConfigError::InvalidLogFormat(v)) if v == "xml"
        );
    }
}
