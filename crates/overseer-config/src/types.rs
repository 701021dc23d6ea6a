//! Configuration struct definitions.
//!
//! Every section derives `Default` and uses serde defaults, so a config
//! file only needs to name what it changes. The only field without a usable
//! default is `server.jar`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A plugin's section after normalization: every value stringified, keys
/// in sorted order.
pub type PluginSection = BTreeMap<String, String>;

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// The supervised server.
    #[serde(default)]
    pub server: ServerSection,
    /// The attach socket.
    #[serde(default)]
    pub attach: AttachSection,
    /// Daemon logging.
    #[serde(default)]
    pub logging: LoggingSection,
    /// Console line patterns.
    #[serde(default)]
    pub patterns: PatternsSection,
    /// Plugin name to raw section.
    #[serde(default)]
    pub plugins: BTreeMap<String, toml::Table>,
    /// Directory of the file this config was loaded from.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Config {
    /// Sections of enabled plugins, in name order.
    ///
    /// A section with `enabled = false` is skipped. The `enabled` key itself
    /// is not passed on. Arrays are joined with `,`.
    #[must_use]
    pub fn plugin_sections(&self) -> BTreeMap<String, PluginSection> {
        self.plugins
            .iter()
            .filter(|(_, table)| {
                !matches!(table.get("enabled"), Some(toml::Value::Boolean(false)))
            })
            .map(|(name, table)| {
                let section = table
                    .iter()
                    .filter(|(key, _)| key.as_str() != "enabled")
                    .filter_map(|(key, value)| stringify(value).map(|v| (key.clone(), v)))
                    .collect();
                (name.clone(), section)
            })
            .collect()
    }

    /// Resolve a possibly relative path against the config file's directory.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Working directory for the server process.
    #[must_use]
    pub fn working_dir(&self) -> PathBuf {
        match &self.server.working_dir {
            Some(dir) => self.resolve(dir),
            None => self
                .base_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// Absolute path of the server jar.
    #[must_use]
    pub fn jar_path(&self) -> PathBuf {
        let jar = &self.server.jar;
        if jar.is_relative() {
            self.working_dir().join(jar)
        } else {
            jar.clone()
        }
    }
}

/// Stringify a scalar or an array of scalars.
pub(crate) fn stringify(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(items) => items
            .iter()
            .map(|item| match item {
                toml::Value::Array(_) | toml::Value::Table(_) => None,
                scalar => stringify(scalar),
            })
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(",")),
        toml::Value::Table(_) => None,
    }
}

/// `[server]`: how to launch and stop the child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    /// Instance name, also the socket name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Java runtime to execute.
    #[serde(default = "default_java")]
    pub java: String,
    /// Flags passed to the runtime before `-jar`.
    #[serde(default)]
    pub java_flags: Vec<String>,
    /// Server jar, relative to the working directory.
    #[serde(default)]
    pub jar: PathBuf,
    /// Arguments after the jar.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Working directory. Defaults to the config file's directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Line written to stdin to request shutdown.
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
    /// Seconds to wait for a graceful stop before killing.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    /// Message body that marks the server as started.
    #[serde(default = "default_done_pattern")]
    pub done_pattern: String,
    /// Start the server again after a crash instead of shutting down.
    #[serde(default)]
    pub restart_on_crash: bool,
    /// Seconds between process stat samples.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_java() -> String {
    "java".to_string()
}

fn default_args() -> Vec<String> {
    vec!["nogui".to_string()]
}

fn default_stop_command() -> String {
    "stop".to_string()
}

fn default_stop_timeout() -> u64 {
    60
}

fn default_done_pattern() -> String {
    r"^Done \([0-9.,]+s\)!.*".to_string()
}

fn default_stats_interval() -> u64 {
    10
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            java: default_java(),
            java_flags: Vec::new(),
            jar: PathBuf::new(),
            args: default_args(),
            working_dir: None,
            stop_command: default_stop_command(),
            stop_timeout_secs: default_stop_timeout(),
            done_pattern: default_done_pattern(),
            restart_on_crash: false,
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl ServerSection {
    /// Arguments after the program: flags, `-jar <jar>`, args.
    #[must_use]
    pub fn argv(&self, jar: &Path) -> Vec<String> {
        let mut argv = self.java_flags.clone();
        argv.push("-jar".to_string());
        argv.push(jar.display().to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// `[attach]`: the local socket clients connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachSection {
    /// Directory holding `<name>.sock`.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
    /// Console lines kept for replay.
    #[serde(default = "default_scrollback")]
    pub scrollback: usize,
    /// Prefix that turns input into a command.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Permission bits for the socket file.
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,
}

/// Per-user runtime directory if the platform has one, else the temp dir.
#[must_use]
pub fn default_socket_dir() -> PathBuf {
    directories::BaseDirs::new()
        .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
        .unwrap_or_else(std::env::temp_dir)
        .join("overseer")
}

fn default_scrollback() -> usize {
    200
}

fn default_command_prefix() -> String {
    "~".to_string()
}

fn default_socket_mode() -> u32 {
    0o660
}

impl Default for AttachSection {
    fn default() -> Self {
        Self {
            socket_dir: default_socket_dir(),
            scrollback: default_scrollback(),
            command_prefix: default_command_prefix(),
            socket_mode: default_socket_mode(),
        }
    }
}

/// `[logging]`: the daemon's own diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Base level.
    #[serde(default = "default_level")]
    pub level: String,
    /// `compact`, `pretty`, `json` or `full`.
    #[serde(default = "default_format")]
    pub format: String,
    /// Write rolling files here instead of stderr.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Extra filter directives.
    #[serde(default)]
    pub directives: Vec<String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "compact".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            directory: None,
            directives: Vec::new(),
        }
    }
}

/// `[patterns]`: regexes that turn console lines into player events.
///
/// Patterns run against the message body (after time and level are
/// stripped). An empty string disables a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternsSection {
    /// Needs `username` and `message` groups.
    #[serde(default = "default_chat")]
    pub chat: String,
    /// Needs `username`, may have `ip`.
    #[serde(default = "default_join")]
    pub join: String,
    /// Needs `username`, may have `reason`.
    #[serde(default = "default_quit")]
    pub quit: String,
    /// Needs `username`.
    #[serde(default = "default_death")]
    pub death: String,
}

fn default_chat() -> String {
    r"^<(?P<username>[A-Za-z0-9_]{1,16})> (?P<message>.*)$".to_string()
}

fn default_join() -> String {
    r"^(?P<username>[A-Za-z0-9_]{1,16})\[/(?P<ip>[0-9a-fA-F.:]+):\d+\] logged in with entity id \d+"
        .to_string()
}

fn default_quit() -> String {
    r"^(?P<username>[A-Za-z0-9_]{1,16}) lost connection: (?P<reason>.*)$".to_string()
}

fn default_death() -> String {
    r"^(?P<username>[A-Za-z0-9_]{1,16}) (?:was |died|drowned|blew up|fell |hit the ground|burned|went up in flames|tried to swim in lava|starved|suffocated|withered|experienced kinetic energy|walked into)".to_string()
}

impl Default for PatternsSection {
    fn default() -> Self {
        Self {
            chat: default_chat(),
            join: default_join(),
            quit: default_quit(),
            death: default_death(),
        }
    }
}

impl PatternsSection {
    /// Non-empty patterns paired with their names.
    #[must_use]
    pub fn active(&self) -> Vec<(&'static str, &str)> {
        [
            ("chat", self.chat.as_str()),
            ("join", self.join.as_str()),
            ("quit", self.quit.as_str()),
            ("death", self.death.as_str()),
        ]
        .into_iter()
        .filter(|(_, pattern)| !pattern.is_empty())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_sections_normalized() {
        let config: Config = toml::from_str(
            r#"
            [plugins.alert]
            interval = 300
            messages = ["one", "two"]
            command = "say"

            [plugins.backup]
            enabled = false
            path = "backups"

            [plugins.shutdown]
            enabled = true
            "#,
        )
        .unwrap();

        let sections = config.plugin_sections();
        assert_eq!(sections.keys().collect::<Vec<_>>(), vec!["alert", "shutdown"]);
        let alert = &sections["alert"];
        assert_eq!(alert["interval"], "300");
        assert_eq!(alert["messages"], "one,two");
        assert!(sections["shutdown"].is_empty());
    }

    #[test]
    fn test_argv() {
        let server = ServerSection {
            java_flags: vec!["-Xmx2G".into()],
            ..ServerSection::default()
        };
        assert_eq!(
            server.argv(Path::new("/srv/mc/server.jar")),
            vec!["-Xmx2G", "-jar", "/srv/mc/server.jar", "nogui"]
        );
    }

    #[test]
    fn test_paths_resolve_against_base() {
        let config = Config {
            server: ServerSection {
                jar: PathBuf::from("server.jar"),
                working_dir: Some(PathBuf::from("world")),
                ..ServerSection::default()
            },
            base_dir: Some(PathBuf::from("/srv/mc")),
            ..Config::default()
        };
        assert_eq!(config.working_dir(), PathBuf::from("/srv/mc/world"));
        assert_eq!(config.jar_path(), PathBuf::from("/srv/mc/world/server.jar"));
    }

    #[test]
    fn test_disabled_pattern_skipped() {
        let patterns = PatternsSection {
            death: String::new(),
            ..PatternsSection::default()
        };
        let names: Vec<_> = patterns.active().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["chat", "join", "quit"]);
    }

    #[test]
    fn test_default_done_pattern_matches_vanilla() {
        let re = regex::Regex::new(&default_done_pattern()).unwrap();
        assert!(re.is_match(r#"Done (4.512s)! For help, type "help""#));
        assert!(!re.is_match("Preparing spawn area: 83%"));
    }

    #[test]
    fn test_default_patterns_match_vanilla_lines() {
        let patterns = PatternsSection::default();
        let join = regex::Regex::new(&patterns.join).unwrap();
        let caps = join
            .captures("Notch[/127.0.0.1:52144] logged in with entity id 182 at (0.5, 64.0, 0.5)")
            .unwrap();
        assert_eq!(&caps["username"], "Notch");
        assert_eq!(&caps["ip"], "127.0.0.1");

        let death = regex::Regex::new(&patterns.death).unwrap();
        assert!(death.is_match("Steve was slain by Zombie"));
        assert!(death.is_match("Alex drowned"));
        assert!(!death.is_match("Steve joined the game"));
    }
}
