//! Translation fault notification
//!
//! The adapter registers one [`FaultNotifier`] per domain with the platform
//! service at construction time. The platform invokes it asynchronously from
//! hardware-fault interrupt handling, so everything here is non-blocking and
//! allocation-free:
//!
//! 1. If the owning driver installed a [`FaultHandler`], its disposition is
//!    returned verbatim. The driver decides whether the fault is recoverable.
//! 2. Otherwise the fault is logged through a rate limiter, optionally
//!    forwarded to telemetry, and reported as handled. The default policy never
//!    escalates a fault.

use alloc::sync::Arc;
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use spin::RwLock;

use crate::{
    config::MmuConfig,
    platform::{Clock, DeviceId, DomainFaultHandler, FaultTelemetry},
    ratelimit::{RateDecision, RateLimiter},
    sg::FaultFlags,
};

/// Rate-limit key of the display feedback event.
pub const FEEDBACK_EVENT_KEY: &str = "DisplayDriverID@@404$$";

/// Code returned to the platform for a fault.
///
/// Zero means handled and lets the device continue. Any other value is passed
/// through untouched; its meaning is between the installed handler and the
/// platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultDisposition(pub i32);

impl FaultDisposition {
    pub const HANDLED: Self = Self(0);

    pub fn is_handled(&self) -> bool {
        *self == Self::HANDLED
    }
}

/// A single translation fault. Transient, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    pub iova: u64,
    pub flags: FaultFlags,
}

/// Driver-supplied fault policy.
///
/// Runs in interrupt-derived context: must not block, allocate, or re-enter
/// the adapter.
pub trait FaultHandler: Send + Sync {
    fn handle_fault(&self, iova: u64, flags: FaultFlags) -> FaultDisposition;
}

impl<F> FaultHandler for F
where
    F: Fn(u64, FaultFlags) -> FaultDisposition + Send + Sync,
{
    fn handle_fault(&self, iova: u64, flags: FaultFlags) -> FaultDisposition {
        self(iova, flags)
    }
}

/// Severity class of a telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSeverity {
    /// Display feedback: an unexpected SMMU fault.
    Error,
}

/// Structured fault event for telemetry sinks.
///
/// The human-readable description is produced by `Display`, so building an
/// event never allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultEvent {
    pub key: &'static str,
    pub severity: FaultSeverity,
    pub device: DeviceId,
    pub iova: u64,
    pub flags: FaultFlags,
}

impl fmt::Display for FaultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            FaultSeverity::Error => write!(
                f,
                "SMMU msm fault iova={:08x} flags={}",
                self.iova,
                self.flags.bits()
            ),
        }
    }
}

/// Snapshot of fault counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FaultStats {
    /// Faults delivered by the platform
    pub delivered: u64,
    /// Faults resolved by an installed handler
    pub handler_resolved: u64,
    /// Faults resolved by the default policy
    pub default_resolved: u64,
    /// Default-path log lines dropped by the rate limiter
    pub log_suppressed: u64,
    /// Telemetry events emitted
    pub telemetry_events: u64,
}

/// Per-adapter fault dispatcher registered with the platform service.
pub struct FaultNotifier {
    device: DeviceId,
    handler: RwLock<Option<Arc<dyn FaultHandler>>>,
    clock: Arc<dyn Clock>,
    telemetry: Option<Arc<dyn FaultTelemetry>>,
    telemetry_active: bool,
    log_limit: RateLimiter,
    telemetry_limit: RateLimiter,
    delivered: AtomicU64,
    handler_resolved: AtomicU64,
    default_resolved: AtomicU64,
    log_suppressed: AtomicU64,
    telemetry_events: AtomicU64,
}

impl FaultNotifier {
    pub fn new(
        device: DeviceId,
        config: &MmuConfig,
        clock: Arc<dyn Clock>,
        telemetry: Option<Arc<dyn FaultTelemetry>>,
    ) -> Self {
        Self {
            device,
            handler: RwLock::new(None),
            clock,
            telemetry,
            telemetry_active: config.telemetry_active(),
            log_limit: RateLimiter::new(config.fault_log_interval_ms, config.fault_log_burst),
            telemetry_limit: RateLimiter::new(config.telemetry_window_ms, 1),
            delivered: AtomicU64::new(0),
            handler_resolved: AtomicU64::new(0),
            default_resolved: AtomicU64::new(0),
            log_suppressed: AtomicU64::new(0),
            telemetry_events: AtomicU64::new(0),
        }
    }

    /// Install or clear the driver's handler. Last registration wins.
    pub fn set_handler(&self, handler: Option<Arc<dyn FaultHandler>>) {
        *self.handler.write() = handler;
    }

    /// Current handler, read without blocking. This is the only read path;
    /// [`FaultNotifier::notify`] dispatches through it.
    ///
    /// Returns `None` while a writer holds the lock; the fault then takes the
    /// default path.
    pub fn handler(&self) -> Option<Arc<dyn FaultHandler>> {
        self.handler.try_read().and_then(|guard| (*guard).clone())
    }

    /// Dispatch one fault.
    pub fn notify(&self, record: FaultRecord) -> FaultDisposition {
        self.delivered.fetch_add(1, Ordering::Relaxed);

        if let Some(handler) = self.handler() {
            self.handler_resolved.fetch_add(1, Ordering::Relaxed);
            return handler.handle_fault(record.iova, record.flags);
        }

        self.report_unexpected(record);
        self.default_resolved.fetch_add(1, Ordering::Relaxed);
        FaultDisposition::HANDLED
    }

    /// Default policy: rate-limited log line, and at most one feedback event
    /// per telemetry window.
    fn report_unexpected(&self, record: FaultRecord) {
        let now = self.clock.now_ms();

        match self.log_limit.check(now) {
            RateDecision::Allow { suppressed } => {
                if suppressed > 0 {
                    log::warn!("[GPU-MMU] {}: {} faults suppressed", self.device, suppressed);
                }
                log::warn!(
                    "[GPU-MMU] *** fault: iova={:08x}, flags={}",
                    record.iova,
                    record.flags.bits()
                );
            }
            RateDecision::Suppress => {
                self.log_suppressed.fetch_add(1, Ordering::Relaxed);
            }
        }

        if !self.telemetry_active {
            return;
        }
        let Some(sink) = self.telemetry.as_ref() else {
            return;
        };
        if self.telemetry_limit.check(now) == RateDecision::Suppress {
            return;
        }

        sink.report(&FaultEvent {
            key: FEEDBACK_EVENT_KEY,
            severity: FaultSeverity::Error,
            device: self.device,
            iova: record.iova,
            flags: record.flags,
        });
        self.telemetry_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> FaultStats {
        FaultStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_resolved: self.handler_resolved.load(Ordering::Relaxed),
            default_resolved: self.default_resolved.load(Ordering::Relaxed),
            log_suppressed: self.log_suppressed.load(Ordering::Relaxed),
            telemetry_events: self.telemetry_events.load(Ordering::Relaxed),
        }
    }
}

impl DomainFaultHandler for FaultNotifier {
    fn on_fault(&self, device: DeviceId, iova: u64, flags: FaultFlags) -> FaultDisposition {
        if device != self.device {
            log::debug!(
                "[GPU-MMU] fault for {} delivered to notifier of {}",
                device,
                self.device
            );
        }
        self.notify(FaultRecord { iova, flags })
    }
}
