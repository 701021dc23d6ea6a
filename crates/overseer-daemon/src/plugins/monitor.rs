//! Watches the console for out-of-memory errors and restarts the server.

use async_trait::async_trait;
use overseer_events::{
    HandlerResult, Outcome, PatternMatch, Prefilter, Priority, RouteRule, RouteTarget, ServerStop,
};
use overseer_plugins::{Plugin, PluginContext, PluginDescriptor, Property, PropertyType};
use tracing::warn;

const ROUTE: &str = "out-of-memory";

const PROPERTIES: &[Property] = &[
    Property::with_default("pattern", PropertyType::String, r"java\.lang\.OutOfMemoryError")
        .doc("Regex matched against every console message"),
    Property::with_default("restart", PropertyType::Boolean, "true")
        .doc("Restart the server when the pattern matches"),
];

pub(super) fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("monitor", || Box::new(Monitor))
        .with_properties(PROPERTIES)
        .with_description("Restart on out-of-memory errors")
}

struct Monitor;

#[async_trait]
impl Plugin for Monitor {
    async fn setup(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        let pattern = ctx.properties().string("pattern").unwrap_or_default();
        let restart = ctx.properties().boolean("restart").unwrap_or(true);
        ctx.add_route(RouteRule::new(RouteTarget::Pattern(ROUTE.to_string()), pattern))?;

        let handler_ctx = ctx.clone();
        ctx.on::<PatternMatch, _, _>(Priority::NORMAL, Prefilter::name(ROUTE), move |hit| {
            let ctx = handler_ctx.clone();
            async move {
                warn!(line = %hit.line, restart, "Server ran out of memory");
                ctx.console(format!("Out of memory: {}", hit.line)).await;
                if restart {
                    ctx.dispatch(ServerStop::new("out of memory").respawn().once())
                        .await;
                }
                HandlerResult::Ok(Outcome::NONE)
            }
        })?;
        Ok(())
    }
}
