//! Console bridge: turns server output and lifecycle events into console
//! lines, which the attach server then fans out.

use overseer_events::{
    Console, DispatchResult, HandlerResult, Outcome, Prefilter, Priority, RegistrationId,
    ServerEvent, ServerOutput, ServerStarted, ServerStarting, ServerStopped, ServerStopping,
    UserAttach, UserDetach, UserInput,
};

use super::Manager;

fn event_level(priority: i32) -> &'static str {
    match priority {
        i32::MIN..=1 => "INFO",
        2 => "WARN",
        _ => "ERROR",
    }
}

impl Manager {
    async fn emit(&self, line: Console) -> HandlerResult {
        self.inner.dispatcher.dispatch(line).await;
        Ok(Outcome::NONE)
    }

    async fn status(&self, message: String) -> HandlerResult {
        self.emit(Console::new("overseer", "status", message)).await
    }

    pub(super) fn install_console_bridge(&self) -> DispatchResult<Vec<RegistrationId>> {
        let any = Prefilter::new;
        let monitor = Priority::MONITOR;
        Ok(vec![
            self.handle::<ServerOutput, _, _>(monitor, any(), |m, out| async move {
                let mut line = Console::new("server", "output", out.data).with_level(out.level);
                if let Some(time) = out.time {
                    line = line.with_time(time);
                }
                m.emit(line).await
            })?,
            self.handle::<UserInput, _, _>(monitor, any(), |m, input| async move {
                m.emit(Console::new("user", "input", input.line).with_user(input.user))
                    .await
            })?,
            self.handle::<UserAttach, _, _>(monitor, any(), |m, e| async move {
                let message = format!("{} attached", e.user);
                m.emit(Console::new("overseer", "joined", message).with_user(e.user))
                    .await
            })?,
            self.handle::<UserDetach, _, _>(monitor, any(), |m, e| async move {
                let message = format!("{} detached", e.user);
                m.emit(Console::new("overseer", "left", message).with_user(e.user))
                    .await
            })?,
            self.handle::<ServerEvent, _, _>(monitor, any(), |m, e| async move {
                let message = format!("{}: {}", e.cause, e.data);
                m.emit(Console::new("overseer", "event", message).with_level(event_level(e.priority)))
                    .await
            })?,
            self.handle::<ServerStarting, _, _>(monitor, any(), |m, e| async move {
                m.status(format!("Server starting (pid {})", e.pid)).await
            })?,
            self.handle::<ServerStarted, _, _>(monitor, any(), |m, _| async move {
                m.status("Server started".to_string()).await
            })?,
            self.handle::<ServerStopping, _, _>(monitor, any(), |m, e| async move {
                let verb = if e.kill { "Killing server" } else { "Server stopping" };
                m.status(format!("{verb}: {}", e.reason)).await
            })?,
            self.handle::<ServerStopped, _, _>(monitor, any(), |m, e| async move {
                let message = match e.exit_code {
                    Some(code) => format!("Server stopped (exit code {code})"),
                    None => "Server stopped".to_string(),
                };
                m.status(message).await
            })?,
        ])
    }
}
