//! Periodic announcements sent to the server console.
//!
//! ```toml
//! [plugins.alert]
//! interval = "15m"
//! messages = "Vote for us!, Backups run at 04:00"
//! command = "say"
//! ```
//!
//! Messages rotate in order. The rotation position survives a reload.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::ensure;
use async_trait::async_trait;
use overseer_plugins::{Plugin, PluginContext, PluginDescriptor, Property, PropertyType};
use serde::{Deserialize, Serialize};
use tracing::debug;

const PROPERTIES: &[Property] = &[
    Property::with_default("interval", PropertyType::Duration, "10m")
        .doc("Time between announcements"),
    Property::required("messages", PropertyType::List).doc("Comma separated announcements"),
    Property::with_default("command", PropertyType::String, "say")
        .doc("Server command used to announce"),
];

pub(super) fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("alert", || Box::new(Alert::default()))
        .with_properties(PROPERTIES)
        .with_description("Rotating announcements on a timer")
}

#[derive(Debug, Serialize, Deserialize)]
struct AlertState {
    next: usize,
}

#[derive(Default)]
struct Alert {
    next: Arc<Mutex<usize>>,
}

/// Take the message at the rotation position and advance it.
fn rotate(messages: &[String], next: &Mutex<usize>) -> Option<String> {
    let mut position = next.lock().unwrap_or_else(PoisonError::into_inner);
    let index = position.checked_rem(messages.len())?;
    *position = index.wrapping_add(1).checked_rem(messages.len()).unwrap_or(0);
    messages.get(index).cloned()
}

#[async_trait]
impl Plugin for Alert {
    async fn setup(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        let props = ctx.properties();
        let messages: Vec<String> = props.list("messages").unwrap_or_default().to_vec();
        ensure!(!messages.is_empty(), "alert needs at least one message");
        let interval = props.duration("interval").unwrap_or_default();
        let command = props.string("command").unwrap_or("say").to_string();

        let task_ctx = ctx.clone();
        let next = Arc::clone(&self.next);
        ctx.repeating_task(interval, false, move || {
            let ctx = task_ctx.clone();
            let line = rotate(&messages, &next).map(|message| format!("{command} {message}"));
            async move {
                if let Some(line) = line {
                    ctx.send(line).await;
                }
            }
        })?;
        debug!(interval = ?interval, "Alerts scheduled");
        Ok(())
    }

    fn save_state(&self) -> Option<serde_json::Value> {
        let next = *self.next.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_value(AlertState { next }).ok()
    }

    fn load_state(&mut self, state: serde_json::Value) -> anyhow::Result<()> {
        let state: AlertState = serde_json::from_value(state)?;
        *self.next.lock().unwrap_or_else(PoisonError::into_inner) = state.next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::harness;
    use overseer_events::{EventKind, ServerInput};
    use overseer_test::EventRecorder;
    use std::time::Duration;

    fn lines(recorder: &EventRecorder) -> Vec<String> {
        recorder
            .of::<ServerInput>()
            .into_iter()
            .map(|input| input.line)
            .collect()
    }

    #[test]
    fn test_rotate_wraps() {
        let messages = vec!["a".to_string(), "b".to_string()];
        let next = Mutex::new(0);
        assert_eq!(rotate(&messages, &next).as_deref(), Some("a"));
        assert_eq!(rotate(&messages, &next).as_deref(), Some("b"));
        assert_eq!(rotate(&messages, &next).as_deref(), Some("a"));
        assert_eq!(rotate(&[], &next), None);
    }

    #[test]
    fn test_rotate_clamps_stale_position() {
        let messages = vec!["a".to_string(), "b".to_string()];
        let next = Mutex::new(7);
        assert_eq!(rotate(&messages, &next).as_deref(), Some("b"));
        assert_eq!(*next.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_announces_on_interval() {
        let (manager, dispatcher) = harness(
            "alert",
            &[("interval", "1m"), ("messages", "first, second"), ("command", "tellraw")],
        );
        let recorder = EventRecorder::attach_kinds(&dispatcher, &[EventKind::ServerInput]);
        manager.load("alert").await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(lines(&recorder).is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(lines(&recorder), vec!["tellraw first"]);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(lines(&recorder), vec!["tellraw first", "tellraw second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_survives_reload() {
        let (manager, dispatcher) = harness("alert", &[("interval", "1m"), ("messages", "a,b,c")]);
        let recorder = EventRecorder::attach_kinds(&dispatcher, &[EventKind::ServerInput]);
        manager.load("alert").await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        manager.reload("alert").await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(lines(&recorder), vec!["say a", "say b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_stops_announcements() {
        let (manager, dispatcher) = harness("alert", &[("interval", "1m"), ("messages", "a")]);
        let recorder = EventRecorder::attach_kinds(&dispatcher, &[EventKind::ServerInput]);
        manager.load("alert").await.unwrap();
        manager.unload("alert").await.unwrap();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(lines(&recorder).is_empty());
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let (manager, _dispatcher) = harness("alert", &[("messages", " , ")]);
        assert!(manager.load("alert").await.is_err());
        assert!(!manager.is_running("alert"));
    }
}
