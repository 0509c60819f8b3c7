//! Adapter configuration
//!
//! Defaults follow the usual kernel rate-limit convention: ten fault lines
//! per five seconds, and one telemetry event per hour.

/// Default fault log window.
pub const DEFAULT_FAULT_LOG_INTERVAL_MS: u64 = 5_000;
/// Default fault log lines per window.
pub const DEFAULT_FAULT_LOG_BURST: u32 = 10;
/// Default telemetry window (one hour).
pub const DEFAULT_TELEMETRY_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Tunables for one adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmuConfig {
    /// Window for rate-limited fault log lines (0 = unlimited)
    pub fault_log_interval_ms: u64,
    /// Fault log lines allowed per window
    pub fault_log_burst: u32,
    /// Window for telemetry fault events; one event per window
    pub telemetry_window_ms: u64,
    /// Forward unexpected faults to telemetry sinks
    pub telemetry_enabled: bool,
}

impl MmuConfig {
    pub const fn new() -> Self {
        Self {
            fault_log_interval_ms: DEFAULT_FAULT_LOG_INTERVAL_MS,
            fault_log_burst: DEFAULT_FAULT_LOG_BURST,
            telemetry_window_ms: DEFAULT_TELEMETRY_WINDOW_MS,
            telemetry_enabled: true,
        }
    }

    pub const fn with_fault_log_limit(mut self, interval_ms: u64, burst: u32) -> Self {
        self.fault_log_interval_ms = interval_ms;
        self.fault_log_burst = burst;
        self
    }

    pub const fn with_telemetry_window(mut self, window_ms: u64) -> Self {
        self.telemetry_window_ms = window_ms;
        self
    }

    pub const fn with_telemetry(mut self, enabled: bool) -> Self {
        self.telemetry_enabled = enabled;
        self
    }

    /// Whether telemetry forwarding is both compiled in and switched on.
    pub const fn telemetry_active(&self) -> bool {
        cfg!(feature = "fault-telemetry") && self.telemetry_enabled
    }
}

impl Default for MmuConfig {
    fn default() -> Self {
        Self::new()
    }
}
