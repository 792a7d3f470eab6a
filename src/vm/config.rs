//! VM configuration.
//!
//! Runtime limits and switches. The VM enforces them; this module only holds them.

use std::env;

/// VM configuration
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum call depth (recursion limit)
    pub max_frames: usize,

    /// Value stack capacity reserved up front
    pub initial_stack_capacity: usize,

    /// Emit a `tracing` debug event per dispatched instruction
    pub trace_execution: bool,

    /// Collect `print` output in `Vm::output` instead of writing to stdout
    pub capture_output: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_frames: 256,
            initial_stack_capacity: 256,
            trace_execution: false,
            capture_output: false,
        }
    }
}

impl VmConfig {
    /// Create a new configuration with default limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `GEARS_TRACE` and `GEARS_MAX_FRAMES`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(trace) = env::var("GEARS_TRACE") {
            config.trace_execution = matches!(trace.as_str(), "1" | "true" | "yes");
        }
        if let Some(frames) = env::var("GEARS_MAX_FRAMES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            config.max_frames = frames;
        }
        config
    }

    /// Configuration for tests and embedding: output is captured, not printed.
    pub fn captured() -> Self {
        Self {
            capture_output: true,
            ..Self::default()
        }
    }
}
