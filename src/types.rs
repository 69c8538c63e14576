use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

/// Identity of a task or task graph.
///
/// Handles compare and hash by this id, never by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Which executor a task runs on.
///
/// - `Pool`: any worker thread (default).
/// - `MainLoop`: the scheduler's cooperative main loop, drained by whichever
///   thread calls `run_main_loop` / `run_main_loop_iteration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    #[default]
    Pool,
    MainLoop,
}

impl FromStr for Affinity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pool" => Ok(Affinity::Pool),
            "main_loop" | "mainloop" | "main" => Ok(Affinity::MainLoop),
            other => Err(format!(
                "invalid affinity: {other} (expected \"pool\" or \"main_loop\")"
            )),
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Affinity::Pool => f.write_str("pool"),
            Affinity::MainLoop => f.write_str("main_loop"),
        }
    }
}
