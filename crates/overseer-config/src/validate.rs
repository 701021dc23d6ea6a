//! Post-parse configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Config, stringify};

/// Validate a parsed configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_server(config)?;
    validate_attach(config)?;
    validate_logging(config)?;
    validate_patterns(config)?;
    validate_plugins(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_server(config: &Config) -> ConfigResult<()> {
    let s = &config.server;

    if s.name.is_empty() || s.name.contains(['/', '\\']) || s.name.starts_with('.') {
        return Err(invalid(
            "server.name",
            format!("'{}' is not usable as a socket name", s.name),
        ));
    }
    if s.jar.as_os_str().is_empty() {
        return Err(invalid("server.jar", "a server jar is required"));
    }
    if s.java.is_empty() {
        return Err(invalid("server.java", "runtime must not be empty"));
    }
    if s.stop_command.trim().is_empty() {
        return Err(invalid("server.stop_command", "stop command must not be empty"));
    }
    if s.stop_timeout_secs == 0 {
        return Err(invalid("server.stop_timeout_secs", "must be greater than zero"));
    }
    if s.stats_interval_secs == 0 {
        return Err(invalid("server.stats_interval_secs", "must be greater than zero"));
    }
    check_regex("server.done_pattern", &s.done_pattern)
}

fn validate_attach(config: &Config) -> ConfigResult<()> {
    let a = &config.attach;
    if a.scrollback == 0 {
        return Err(invalid("attach.scrollback", "must be greater than zero"));
    }
    if a.command_prefix.is_empty() {
        return Err(invalid("attach.command_prefix", "must not be empty"));
    }
    if a.socket_mode > 0o777 {
        return Err(invalid(
            "attach.socket_mode",
            format!("{:o} is not a permission mode", a.socket_mode),
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let format = config.logging.format.as_str();
    if !matches!(format, "compact" | "pretty" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!("unsupported format '{format}'; expected one of: compact, pretty, json, full"),
        ));
    }
    Ok(())
}

fn validate_patterns(config: &Config) -> ConfigResult<()> {
    for (name, pattern) in config.patterns.active() {
        check_regex(&format!("patterns.{name}"), pattern)?;
    }
    Ok(())
}

fn validate_plugins(config: &Config) -> ConfigResult<()> {
    for (name, table) in &config.plugins {
        if let Some(enabled) = table.get("enabled") {
            if !enabled.is_bool() {
                return Err(invalid(&format!("plugins.{name}.enabled"), "must be a boolean"));
            }
        }
        for (key, value) in table {
            if stringify(value).is_none() {
                return Err(invalid(
                    &format!("plugins.{name}.{key}"),
                    "plugin settings must be scalars or arrays of scalars",
                ));
            }
        }
    }
    Ok(())
}

fn check_regex(field: &str, pattern: &str) -> ConfigResult<()> {
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| invalid(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn valid() -> Config {
        let mut config = Config::default();
        config.server.jar = PathBuf::from("server.jar");
        config
    }

    fn field_of(result: ConfigResult<()>) -> String {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_with_jar_is_valid() {
        assert!(validate(&valid()).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = valid();
        config.server.stop_timeout_secs = 0;
        assert_eq!(field_of(validate(&config)), "server.stop_timeout_secs");
    }

    #[test]
    fn test_bad_name_rejected() {
        let mut config = valid();
        config.server.name = "../etc".into();
        assert_eq!(field_of(validate(&config)), "server.name");
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let mut config = valid();
        config.patterns.chat = "(unclosed".into();
        assert_eq!(field_of(validate(&config)), "patterns.chat");
    }

    #[test]
    fn test_nested_plugin_table_rejected() {
        let config: Config = toml::from_str(
            r#"
            [server]
            jar = "server.jar"

            [plugins.alert.nested]
            x = 1
            "#,
        )
        .unwrap();
        assert_eq!(field_of(validate(&config)), "plugins.alert.nested");
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let mut config = valid();
        config.logging.format = "xml".into();
        assert_eq!(field_of(validate(&config)), "logging.format");
    }

    #[test]
    fn test_zero_scrollback_rejected() {
        let mut config = valid();
        config.attach.scrollback = 0;
        assert_eq!(field_of(validate(&config)), "attach.scrollback");
    }
}
