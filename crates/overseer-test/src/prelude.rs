//! Prelude module - commonly used test helpers.

pub use crate::{
    DONE_LINE, DONE_PATTERN, EventRecorder, FakeLauncher, FakeServer, console_line,
    init_test_logging, test_supervisor_config,
};
