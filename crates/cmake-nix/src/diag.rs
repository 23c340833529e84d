use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::warn;

/// `NIX_DEBUG=1` turns on `[NIX-DEBUG]` messages.
pub fn debug_enabled() -> bool {
    std::env::var("NIX_DEBUG").map(|v| v == "1").unwrap_or(false)
}

/// `NIX_PROFILE=1` turns on `[NIX-PROFILE]` phase timing.
pub fn profile_enabled() -> bool {
    std::env::var("NIX_PROFILE").map(|v| v == "1").unwrap_or(false)
}

/// `NIX_PROFILE_DETAILED=1` additionally times hot loops (per object,
/// per library lookup).
pub fn profile_detailed_enabled() -> bool {
    std::env::var("NIX_PROFILE_DETAILED")
        .map(|v| v == "1")
        .unwrap_or(false)
}

pub fn debug(msg: impl AsRef<str>) {
    if debug_enabled() {
        eprintln!("[NIX-DEBUG] {}", msg.as_ref());
    }
    tracing::debug!("{}", msg.as_ref());
}

/// Collector for warnings raised during a generation pass. Warnings go
/// to the log immediately and stay inspectable afterwards; generation
/// never turns them into failures.
#[derive(Clone, Default)]
pub struct Diagnostics {
    warnings: Arc<Mutex<Vec<String>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.lock().expect("diagnostics mutex").push(message);
    }

    /// Warning attributed to a target.
    pub fn target_warning(&self, target: &str, message: impl AsRef<str>) {
        self.warning(format!("[target {}] {}", target, message.as_ref()));
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().expect("diagnostics mutex").clone()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.lock().expect("diagnostics mutex").is_empty()
    }
}

/// Scope timer emitting `[NIX-PROFILE] START/END <phase>` lines when
/// profiling is on.
pub struct ProfileTimer {
    name: String,
    start: Option<Instant>,
}

impl ProfileTimer {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let start = if profile_enabled() {
            eprintln!("[NIX-PROFILE] START: {name}");
            Some(Instant::now())
        } else {
            None
        };
        ProfileTimer { name, start }
    }

    /// Timer that only runs under `NIX_PROFILE_DETAILED=1`, for hot loops.
    pub fn detailed(name: impl Into<String>) -> Self {
        let name = name.into();
        let start = if profile_enabled() && profile_detailed_enabled() {
            eprintln!("[NIX-PROFILE] START: {name}");
            Some(Instant::now())
        } else {
            None
        };
        ProfileTimer { name, start }
    }
}

impl Drop for ProfileTimer {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            let ms = start.elapsed().as_secs_f64() * 1000.0;
            eprintln!("[NIX-PROFILE] END: {} (duration: {:.3} ms)", self.name, ms);
        }
    }
}
