//! Scheduled stops and restarts with in-game countdown warnings.
//!
//! Adds three public commands:
//!
//! - `stop-in <duration>` stops the server after `duration`
//! - `restart-in <duration>` restarts it after `duration`
//! - `cancel-stop` abandons a pending countdown
//!
//! Scheduling a new countdown replaces the pending one. A reload of the
//! plugin drops any countdown in flight.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use overseer_events::{HandlerResult, Hook, Outcome, ServerStop, TaskId};
use overseer_plugins::{
    Plugin, PluginContext, PluginDescriptor, PluginResult, Property, PropertyType, parse_duration,
};
use tracing::info;

const PROPERTIES: &[Property] = &[
    Property::with_default("warnings", PropertyType::List, "5m,1m,30s,10s")
        .doc("How long before the stop to warn players"),
    Property::with_default("command", PropertyType::String, "say")
        .doc("Server command used for warnings"),
];

pub(super) fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("shutdown", || Box::new(Shutdown))
        .with_properties(PROPERTIES)
        .with_description("Countdown stops and restarts")
}

struct Shutdown;

/// Render a duration the way players read it: `1m 30s`, `2h`, `45s`.
fn describe(duration: Duration) -> String {
    let secs = duration.as_secs();
    let minutes = secs.checked_div(60).unwrap_or(0);
    let parts = [
        (minutes.checked_div(60).unwrap_or(0), "h"),
        (minutes.checked_rem(60).unwrap_or(0), "m"),
        (secs.checked_rem(60).unwrap_or(0), "s"),
    ];
    let text: Vec<String> = parts
        .iter()
        .filter(|(amount, _)| *amount > 0)
        .map(|(amount, unit)| format!("{amount}{unit}"))
        .collect();
    if text.is_empty() {
        "now".to_string()
    } else {
        text.join(" ")
    }
}

#[derive(Clone)]
struct Countdown {
    ctx: PluginContext,
    command: String,
    warnings: Arc<[Duration]>,
    pending: Arc<Mutex<Vec<TaskId>>>,
}

impl Countdown {
    /// Cancel the pending countdown. Returns whether one was pending.
    fn cancel(&self) -> bool {
        let ids = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        let mut cancelled = false;
        for id in ids {
            cancelled |= self.ctx.cancel_task(id);
        }
        cancelled
    }

    fn schedule(&self, delay: Duration, respawn: bool) -> PluginResult<()> {
        self.cancel();
        let (action, noun) = if respawn {
            ("restarting", "restart")
        } else {
            ("stopping", "stop")
        };
        let mut ids = Vec::new();

        for &warning in self.warnings.iter() {
            let Some(at) = delay.checked_sub(warning) else {
                continue;
            };
            if at.is_zero() {
                continue;
            }
            let ctx = self.ctx.clone();
            let line = format!("{} Server {action} in {}", self.command, describe(warning));
            ids.push(self.ctx.delayed_task(at, move || async move {
                ctx.send(line).await;
            })?);
        }

        let mut stop = ServerStop::new(format!("scheduled {noun}")).once();
        if respawn {
            stop = stop.respawn();
        }
        let this = self.clone();
        ids.push(self.ctx.delayed_task(delay, move || async move {
            this.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            this.ctx.dispatch(stop).await;
        })?);

        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = ids;
        info!(delay = ?delay, respawn, "Countdown scheduled");
        Ok(())
    }

    async fn start(self, hook: Hook, respawn: bool) -> HandlerResult {
        let raw = hook
            .argv()
            .first()
            .map(|s| (*s).to_string())
            .ok_or_else(|| anyhow!("usage: {} <duration>", hook.name))?;
        let delay = parse_duration(&raw)
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("{} {raw}", hook.name))?;
        self.schedule(delay, respawn)?;

        let action = if respawn { "restarting" } else { "stopping" };
        self.ctx
            .send(format!("{} Server {action} in {}", self.command, describe(delay)))
            .await;
        self.ctx
            .console(format!("Server {action} in {}", describe(delay)))
            .await;
        Ok(Outcome::NONE)
    }

    async fn abort(self) -> HandlerResult {
        if self.cancel() {
            self.ctx
                .send(format!("{} Scheduled stop cancelled", self.command))
                .await;
            self.ctx.console("Countdown cancelled").await;
        } else {
            self.ctx.console("No countdown pending").await;
        }
        Ok(Outcome::NONE)
    }
}

#[async_trait]
impl Plugin for Shutdown {
    async fn setup(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        let props = ctx.properties();
        let mut warnings = Vec::new();
        for raw in props.list("warnings").unwrap_or_default() {
            let warning = parse_duration(raw)
                .map_err(|e| anyhow!(e))
                .with_context(|| format!("bad warning '{raw}'"))?;
            warnings.push(warning);
        }

        let countdown = Countdown {
            ctx: ctx.clone(),
            command: props.string("command").unwrap_or("say").to_string(),
            warnings: warnings.into(),
            pending: Arc::default(),
        };

        let c = countdown.clone();
        ctx.command("stop-in", "Stop the server after a delay", move |hook| {
            c.clone().start(hook, false)
        })?;
        let c = countdown.clone();
        ctx.command("restart-in", "Restart the server after a delay", move |hook| {
            c.clone().start(hook, true)
        })?;
        ctx.command("cancel-stop", "Cancel a scheduled stop or restart", move |_| {
            countdown.clone().abort()
        })?;
        Ok(())
    }
}
