//! Interval/burst rate limiting for the fault path
//!
//! Allows at most `burst` events per `interval_ms` window. Windows are aligned
//! to multiples of the interval. Suppressed events are counted so the next
//! permitted line can report them. Lock-free and allocation-free: it runs in
//! interrupt-derived fault context.

use core::sync::atomic::{AtomicU64, Ordering};

/// Fixed-window event limiter
pub struct RateLimiter {
    /// Window length in milliseconds (0 = unlimited)
    interval_ms: u64,
    /// Events allowed per window (0 = none)
    burst: u32,
    /// Window index in the high half, events admitted in it in the low half.
    /// One word so a window roll and an admission cannot interleave.
    state: AtomicU64,
    /// Events dropped since the last report
    suppressed: AtomicU64,
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Emit the event. `suppressed` events were dropped since the last
    /// emitted one.
    Allow { suppressed: u64 },
    /// Drop the event.
    Suppress,
}

const fn pack(window: u32, admitted: u32) -> u64 {
    ((window as u64) << 32) | admitted as u64
}

const fn unpack(state: u64) -> (u32, u32) {
    ((state >> 32) as u32, state as u32)
}

impl RateLimiter {
    pub const fn new(interval_ms: u64, burst: u32) -> Self {
        Self {
            interval_ms,
            burst,
            state: AtomicU64::new(pack(0, 0)),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Check whether an event at time `now_ms` may be emitted
    pub fn check(&self, now_ms: u64) -> RateDecision {
        if self.interval_ms == 0 {
            return self.allow();
        }

        let window = (now_ms / self.interval_ms) as u32;
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (seen_window, seen_admitted) = unpack(current);

            // A caller that sampled the clock just before a racer rolled the
            // window counts against the newer window.
            let (window, admitted) = if seen_window == window {
                (window, seen_admitted)
            } else if (seen_window.wrapping_sub(window) as i32) > 0 {
                (seen_window, seen_admitted)
            } else {
                (window, 0)
            };

            if admitted >= self.burst {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                return RateDecision::Suppress;
            }

            match self.state.compare_exchange_weak(
                current,
                pack(window, admitted + 1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return self.allow(),
                Err(val) => current = val,
            }
        }
    }

    fn allow(&self) -> RateDecision {
        RateDecision::Allow {
            suppressed: self.suppressed.swap(0, Ordering::AcqRel),
        }
    }

    /// Events dropped since the last admitted one.
    pub fn pending_suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}
