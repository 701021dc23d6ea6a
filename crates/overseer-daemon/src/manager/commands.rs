//! Built-in commands and the fatal error policy.

use std::collections::BTreeMap;
use std::future::Future;

use anyhow::{Context as _, bail};
use overseer_events::{
    Console, DispatchResult, EventKind, FatalError, HandlerResult, Hook, Outcome, Prefilter,
    Priority, RegistrationId, ServerStart, ServerStop,
};
use tracing::{error, warn};

use super::Manager;

/// Fatal reasons the supervisor reports for a crashed server.
const CRASH_PREFIX: &str = "server crashed";

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1"
    )
}

fn requested_by(hook: &Hook) -> String {
    hook.user.clone().unwrap_or_else(|| "console".to_string())
}

impl Manager {
    fn command<F, Fut>(&self, name: &str, doc: &str, f: F) -> DispatchResult<RegistrationId>
    where
        F: Fn(Manager, Hook) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let prefilter = Prefilter::name(name).arg("public", "true").arg("doc", doc);
        self.handle::<Hook, _, _>(Priority::NORMAL, prefilter, f)
    }

    async fn reply(&self, message: impl Into<String>) {
        self.say("command", message).await;
    }

    pub(super) fn install_commands(&self) -> DispatchResult<Vec<RegistrationId>> {
        Ok(vec![
            self.command("help", "List available commands", |m, _| m.help())?,
            self.command("stop", "Stop the server and the daemon", |m, hook| async move {
                let reason = format!("stop requested by {}", requested_by(&hook));
                m.inner.dispatcher.dispatch(ServerStop::new(reason)).await;
                Ok(Outcome::NONE)
            })?,
            self.command("kill", "Kill the server immediately", |m, hook| async move {
                let reason = format!("kill requested by {}", requested_by(&hook));
                m.inner
                    .dispatcher
                    .dispatch(ServerStop::new(reason).kill())
                    .await;
                Ok(Outcome::NONE)
            })?,
            self.command("restart", "Restart the server", |m, hook| async move {
                let reason = format!("restart requested by {}", requested_by(&hook));
                m.inner
                    .dispatcher
                    .dispatch(ServerStop::new(reason).respawn())
                    .await;
                Ok(Outcome::NONE)
            })?,
            self.command("rehash", "Reload plugin settings from the config file", |m, _| {
                m.rehash()
            })?,
            self.command("reload-plugin", "Reload one plugin by name", |m, hook| {
                m.reload_plugin(hook)
            })?,
            self.command("plugins", "List running and available plugins", |m, _| {
                m.list_plugins()
            })?,
            self.handle::<FatalError, _, _>(Priority::HIGH, Prefilter::new(), |m, fatal| {
                m.restart_after_crash(fatal)
            })?,
            self.handle::<FatalError, _, _>(Priority::MONITOR, Prefilter::new(), |m, fatal| {
                m.report_fatal(fatal)
            })?,
        ])
    }

    async fn help(self) -> HandlerResult {
        let mut commands = BTreeMap::new();
        for info in self.inner.dispatcher.registrations(EventKind::Hook) {
            let public = info.prefilter.get("public").is_some_and(is_truthy);
            let Some(name) = info.prefilter.get("name") else {
                continue;
            };
            if info.enabled && public {
                commands
                    .entry(name.to_string())
                    .or_insert_with(|| info.prefilter.get("doc").unwrap_or_default().to_string());
            }
        }

        let prefix = &self.inner.config.attach.command_prefix;
        for (name, doc) in commands {
            if doc.is_empty() {
                self.reply(format!("{prefix}{name}")).await;
            } else {
                self.reply(format!("{prefix}{name} - {doc}")).await;
            }
        }
        Ok(Outcome::NONE)
    }

    async fn rehash(self) -> HandlerResult {
        let Some(path) = self.inner.config_path.clone() else {
            bail!("no config file to reload");
        };
        let config = overseer_config::load_file(&path)
            .with_context(|| format!("rehash of {} failed", path.display()))?;
        let plan = self.inner.plugins.rehash(config.plugin_sections()).await;
        self.reply(format!(
            "Rehashed: {} unloaded, {} reloaded, {} loaded, {} unchanged",
            plan.unload.len(),
            plan.reload.len(),
            plan.load.len(),
            plan.unchanged.len()
        ))
        .await;
        Ok(Outcome::NONE)
    }

    async fn reload_plugin(self, hook: Hook) -> HandlerResult {
        let Some(name) = hook.argv().first().map(|s| (*s).to_string()) else {
            bail!("usage: reload-plugin <name>");
        };
        self.inner.plugins.reload(&name).await?;
        self.reply(format!("Reloaded plugin {name}")).await;
        Ok(Outcome::NONE)
    }

    async fn list_plugins(self) -> HandlerResult {
        let running = self.inner.plugins.running();
        let available: Vec<&str> = self
            .inner
            .plugins
            .registry()
            .names()
            .into_iter()
            .filter(|name| !running.iter().any(|r| r.as_str() == *name))
            .collect();
        self.reply(format!("Running plugins: {}", running.join(", ")))
            .await;
        self.reply(format!("Available plugins: {}", available.join(", ")))
            .await;
        Ok(Outcome::NONE)
    }

    async fn restart_after_crash(self, fatal: FatalError) -> HandlerResult {
        if !self.inner.config.server.restart_on_crash || !fatal.reason.starts_with(CRASH_PREFIX) {
            return Ok(Outcome::NONE);
        }
        warn!(reason = %fatal.reason, "Restarting crashed server");
        self.say("status", format!("Restarting after crash: {}", fatal.reason))
            .await;
        self.inner.dispatcher.dispatch(ServerStart {}).await;
        Ok(Outcome::EAT)
    }

    async fn report_fatal(self, fatal: FatalError) -> HandlerResult {
        error!(reason = %fatal.reason, "Fatal error, shutting down");
        let line = Console::new("overseer", "error", format!("fatal: {}", fatal.reason))
            .with_level("ERROR");
        self.inner.dispatcher.dispatch(line).await;
        Ok(Outcome::NONE)
    }
}
