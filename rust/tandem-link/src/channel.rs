//! Notification channels.
//!
//! One channel per signal class and direction pair: REQUEST carries "you
//! have a new call", REPLY carries "your call completed". The two classes
//! ride independent lines so a burst of requests never delays the reply
//! that would unblock a waiting caller, and vice versa.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::line::{IrqLine, IrqSlot};

/// Signal class a channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClass {
    Request,
    Reply,
}

impl ChannelClass {
    /// Class name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ChannelClass::Request => "request",
            ChannelClass::Reply => "reply",
        }
    }
}

/// Sent/received counter snapshot for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCounters {
    pub sent: u64,
    pub received: u64,
}

/// One direction of one signal class: the peer's raisable line plus our
/// local slot for the same class.
pub struct NotifyChannel {
    class: ChannelClass,
    peer_line: Arc<dyn IrqLine>,
    local: Arc<IrqSlot>,
    sent: AtomicU64,
}

impl NotifyChannel {
    pub fn new(class: ChannelClass, peer_line: Arc<dyn IrqLine>, local: Arc<IrqSlot>) -> Self {
        Self {
            class,
            peer_line,
            local,
            sent: AtomicU64::new(0),
        }
    }

    /// The signal class this channel carries.
    #[inline]
    pub fn class(&self) -> ChannelClass {
        self.class
    }

    /// Raise the peer's line and count the send.
    pub fn send(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.peer_line.raise();
    }

    /// Loop the local line back on itself: latch and deliver without any
    /// peer cooperation. Self-test hook.
    pub fn fake(&self) {
        self.local.trigger();
    }

    /// Install the fixed per-channel callback run on delivery.
    pub fn set_callback(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.local.set_handler(callback);
    }

    /// Remove the callback (teardown).
    pub fn clear_callback(&self) {
        self.local.clear_handler();
    }

    /// Gate local delivery open (drains anything latched while closed).
    pub fn enable(&self) {
        self.local.enable();
    }

    /// Gate local delivery closed.
    pub fn disable(&self) {
        self.local.disable();
    }

    /// True if local delivery is gated open.
    pub fn is_enabled(&self) -> bool {
        self.local.is_enabled()
    }

    /// Counter snapshot.
    pub fn counters(&self) -> ChannelCounters {
        ChannelCounters {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.local.received(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::LoopbackLine;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn send_raises_peer_and_counts() {
        let slot_a = IrqSlot::new();
        let slot_b = IrqSlot::new();
        let a = NotifyChannel::new(
            ChannelClass::Request,
            LoopbackLine::new(slot_b.clone()),
            slot_a.clone(),
        );
        let b = NotifyChannel::new(
            ChannelClass::Request,
            LoopbackLine::new(slot_a),
            slot_b,
        );

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        b.set_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        b.enable();

        a.send();
        a.send();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(a.counters().sent, 2);
        assert_eq!(b.counters().received, 2);
        assert_eq!(b.counters().sent, 0);
    }

    #[test]
    fn fake_delivers_without_peer() {
        let slot = IrqSlot::new();
        let channel = NotifyChannel::new(
            ChannelClass::Reply,
            LoopbackLine::new(IrqSlot::new()),
            slot,
        );

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        channel.set_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        channel.enable();

        channel.fake();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // A fake is a local loopback: nothing was sent to the peer.
        assert_eq!(channel.counters().sent, 0);
        assert_eq!(channel.counters().received, 1);
    }

    #[test]
    fn disabled_channel_latches_and_replays() {
        let slot = IrqSlot::new();
        let channel = NotifyChannel::new(
            ChannelClass::Request,
            LoopbackLine::new(IrqSlot::new()),
            slot,
        );
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        channel.set_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        channel.fake();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        channel.enable();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        channel.disable();
        channel.fake();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        channel.enable();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
