//! Soft-interrupt lines.
//!
//! The hardware interface this runtime consumes is deliberately tiny:
//! "raise software interrupt line N" toward the peer, and ack/clear the
//! local line on receipt. [`IrqLine`] is the raisable half; [`IrqSlot`] is
//! the local half: a latch, an enable gate, and the registered handler.
//!
//! Delivery runs on the raiser's thread, which is this runtime's stand-in
//! for interrupt context: handlers must stay short and must not block.
//! [`LoopbackLine`] connects a raisable line directly to a local slot so
//! two endpoints in one process form a full relationship without hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A raisable soft-interrupt line toward the peer.
///
/// Real systems implement this over a mailbox/doorbell register; tests use
/// [`LoopbackLine`]. Lines are a fixed, chip-specific resource; running
/// out of them is a build-time error, so nothing here allocates.
pub trait IrqLine: Send + Sync {
    /// Raise the line. Must be callable from any context and must not
    /// block.
    fn raise(&self);
}

type Handler = Box<dyn Fn() + Send + Sync>;

/// The receiving end of one local line: pending latch, enable gate,
/// handler.
///
/// A raise while the line is disabled (or before a handler is installed)
/// is latched, not lost; it is delivered when the line is enabled again.
/// Deliveries are serialized per slot: one "interrupt" at a time, as on
/// the real line.
pub struct IrqSlot {
    pending: AtomicBool,
    enabled: AtomicBool,
    received: AtomicU64,
    handler: Mutex<Option<Handler>>,
}

impl IrqSlot {
    /// A new slot: no handler, delivery disabled, nothing pending.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            received: AtomicU64::new(0),
            handler: Mutex::new(None),
        })
    }

    /// Install the fixed per-line handler.
    pub fn set_handler(&self, handler: Handler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Remove the handler (teardown). Raises latch until a new handler is
    /// installed and the line is re-enabled.
    pub fn clear_handler(&self) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Latch the line and attempt delivery. This is what a raise from the
    /// peer lands on.
    pub fn trigger(&self) {
        self.pending.store(true, Ordering::Release);
        self.deliver();
    }

    /// Gate delivery open and drain anything latched while closed.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        self.deliver();
    }

    /// Gate delivery closed. Raises arriving while closed stay latched.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// True if delivery is gated open.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Number of delivered (acked) interrupts.
    #[inline]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// True if a raise is latched and undelivered.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn deliver(&self) {
        if !self.is_enabled() {
            return;
        }
        // One delivery at a time; a raise landing mid-delivery re-latches
        // and is picked up by the loop.
        let handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        while self.pending.swap(false, Ordering::AcqRel) {
            // The swap above is the ack: the line is clear before the
            // handler runs, so a raise during the handler is not lost.
            // Count at ack time. The handler may unblock an observer of
            // this counter.
            self.received.fetch_add(1, Ordering::Relaxed);
            if let Some(h) = handler.as_ref() {
                h();
            }
        }
    }
}

/// An [`IrqLine`] wired directly to a local [`IrqSlot`].
pub struct LoopbackLine {
    target: Arc<IrqSlot>,
}

impl LoopbackLine {
    /// A line whose raises land on `target`.
    pub fn new(target: Arc<IrqSlot>) -> Arc<Self> {
        Arc::new(Self { target })
    }
}

impl IrqLine for LoopbackLine {
    fn raise(&self) {
        self.target.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn raise_while_disabled_is_latched_not_lost() {
        let slot = IrqSlot::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        slot.set_handler(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        slot.trigger();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(slot.is_pending());

        slot.enable();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!slot.is_pending());
        assert_eq!(slot.received(), 1);
    }

    #[test]
    fn disable_gates_subsequent_raises() {
        let slot = IrqSlot::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        slot.set_handler(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        slot.enable();

        slot.trigger();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        slot.disable();
        slot.trigger();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        slot.enable();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn loopback_line_delivers_to_target() {
        let slot = IrqSlot::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        slot.set_handler(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        slot.enable();

        let line = LoopbackLine::new(slot.clone());
        line.raise();
        line.raise();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(slot.received(), 2);
    }
}
