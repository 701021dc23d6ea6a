//! Bridge from `overseer_config::Config` to domain types.
//!
//! The config crate has no dependencies on other internal crates. These
//! functions translate its sections into the types the supervisor, the
//! attach server, the router and the logger consume.

use std::time::Duration;

use overseer_attach::{AttachConfig, socket_path};
use overseer_config::{Config, PatternsSection};
use overseer_events::{RouteRule, RouteTarget};
use overseer_process::{LaunchSpec, SupervisorConfig};
use overseer_telemetry::{LogConfig, LogFormat};

/// Convert config to [`LogConfig`].
///
/// With a `logging.directory` the daemon writes rolling files named after
/// the instance.
#[must_use]
pub fn to_log_config(cfg: &Config) -> LogConfig {
    let format = match cfg.logging.format.as_str() {
        "pretty" => LogFormat::Pretty,
        "json" => LogFormat::Json,
        "full" => LogFormat::Full,
        _ => LogFormat::Compact,
    };

    let mut log_config = LogConfig::new(&cfg.logging.level).with_format(format);

    if let Some(dir) = &cfg.logging.directory {
        log_config = log_config.with_file(cfg.resolve(dir), cfg.server.name.as_str());
    }
    for directive in &cfg.logging.directives {
        log_config = log_config.with_directive(directive);
    }

    log_config
}

/// Convert config to [`SupervisorConfig`].
#[must_use]
pub fn to_supervisor_config(cfg: &Config) -> SupervisorConfig {
    let server = &cfg.server;
    SupervisorConfig {
        launch: LaunchSpec {
            program: server.java.clone(),
            args: server.argv(&cfg.jar_path()),
            working_dir: cfg.working_dir(),
        },
        stop_command: server.stop_command.clone(),
        stop_timeout: Duration::from_secs(server.stop_timeout_secs),
        done_pattern: server.done_pattern.clone(),
        stats_interval: Duration::from_secs(server.stats_interval_secs),
    }
}

/// Convert config to [`AttachConfig`].
///
/// The configured patterns are advertised to clients on attach.
#[must_use]
pub fn to_attach_config(cfg: &Config) -> AttachConfig {
    let dir = cfg.resolve(&cfg.attach.socket_dir);
    AttachConfig::new(socket_path(&dir, &cfg.server.name))
        .with_scrollback(cfg.attach.scrollback)
        .with_command_prefix(cfg.attach.command_prefix.as_str())
        .with_socket_mode(cfg.attach.socket_mode)
        .with_patterns(cfg.patterns.active())
}

/// Router rules for the configured player patterns. Empty patterns are
/// skipped.
#[must_use]
pub fn route_rules(patterns: &PatternsSection) -> Vec<RouteRule> {
    patterns
        .active()
        .into_iter()
        .filter_map(|(name, pattern)| {
            let target = match name {
                "chat" => RouteTarget::Chat,
                "join" => RouteTarget::Join,
                "quit" => RouteTarget::Quit,
                "death" => RouteTarget::Death,
                _ => return None,
            };
            Some(RouteRule::new(target, pattern).with_level("INFO"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use overseer_telemetry::LogTarget;

    use super::*;

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.server.name = "survival".into();
        cfg.server.jar = PathBuf::from("server.jar");
        cfg.server.java_flags = vec!["-Xmx2G".into()];
        cfg.base_dir = Some(PathBuf::from("/srv/mc"));
        cfg
    }

    #[test]
    fn test_supervisor_config_builds_command_line() {
        let sup = to_supervisor_config(&config());
        assert_eq!(sup.launch.program, "java");
        assert_eq!(
            sup.launch.args,
            vec!["-Xmx2G", "-jar", "/srv/mc/server.jar", "nogui"]
        );
        assert_eq!(sup.launch.working_dir, Path::new("/srv/mc"));
        assert_eq!(sup.stop_timeout, Duration::from_secs(60));
        assert_eq!(sup.stop_command, "stop");
    }

    #[test]
    fn test_attach_config_names_socket_after_instance() {
        let mut cfg = config();
        cfg.attach.socket_dir = PathBuf::from("run");
        let attach = to_attach_config(&cfg);
        assert_eq!(attach.socket_path, Path::new("/srv/mc/run/survival.sock"));
        assert_eq!(attach.command_prefix, "~");
        assert_eq!(
            attach.patterns.keys().collect::<Vec<_>>(),
            vec!["chat", "death", "join", "quit"]
        );
    }

    #[test]
    fn test_log_config_file_target() {
        let mut cfg = config();
        cfg.logging.format = "json".into();
        cfg.logging.directory = Some(PathBuf::from("logs"));
        cfg.logging.directives = vec!["overseer_process=trace".into()];

        let log = to_log_config(&cfg);
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.target, LogTarget::File(PathBuf::from("/srv/mc/logs")));
        assert_eq!(log.prefix, "survival");
        assert_eq!(log.directives, vec!["overseer_process=trace"]);
    }

    #[test]
    fn test_route_rules_skip_disabled_patterns() {
        let patterns = PatternsSection {
            death: String::new(),
            ..PatternsSection::default()
        };
        let targets: Vec<RouteTarget> = route_rules(&patterns)
            .into_iter()
            .map(|r| r.target)
            .collect();
        assert_eq!(
            targets,
            vec![RouteTarget::Chat, RouteTarget::Join, RouteTarget::Quit]
        );
    }
}
