//! CLI theme and styling.

use colored::Colorize;
use overseer_events::Console;

/// CLI theme configuration.
pub(crate) struct Theme;

impl Theme {
    /// Format a header.
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    /// Format a success message.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✓".green(), text)
    }

    /// Format an error message.
    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✗".red(), text.red())
    }

    /// Format a warning message.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    /// Format an info message.
    pub(crate) fn info(text: &str) -> String {
        format!("{} {}", "i".blue(), text)
    }

    /// Format a dimmed message.
    pub(crate) fn dimmed(text: &str) -> String {
        format!("{}", text.dimmed())
    }

    /// Format a separator line.
    pub(crate) fn separator() -> String {
        "━".repeat(50).dimmed().to_string()
    }

    /// Color a console line by where it came from and how severe it is.
    pub(crate) fn console(line: &Console) -> String {
        let text = line.render();
        match (line.level.as_deref(), line.kind.as_str()) {
            (Some("ERROR" | "SEVERE"), _) | (_, "error") => text.red().to_string(),
            (Some("WARN" | "WARNING"), _) => text.yellow().to_string(),
            (_, "status") => text.cyan().to_string(),
            (_, "joined" | "left") => text.green().to_string(),
            (_, "input") => text.bold().to_string(),
            (_, "command" | "plugin") => text.blue().to_string(),
            _ => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_keeps_rendered_text() {
        colored::control::set_override(false);
        let line = Console::new("server", "output", "Done").with_time("12:00:00");
        assert_eq!(Theme::console(&line), "12:00:00 Done");

        let warn = Console::new("server", "output", "Lag")
            .with_time("12:00:01")
            .with_level("WARN");
        assert_eq!(Theme::console(&warn), "12:00:01 [WARN] Lag");
    }
}
