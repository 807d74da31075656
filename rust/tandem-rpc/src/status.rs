//! Cross-boundary status codes.
//!
//! Every protocol- and call-level failure is a typed status, never a
//! panic: both peers (and both implementation languages) branch on the
//! same u16 values. A caller can always tell "the remote does not
//! implement this" from "the call failed in flight".

use core::fmt;

/// Wire status, carried in reply descriptors and surfaced to callers.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success = 0,
    /// The handle does not name a pending call.
    InvalidHandle = 1,
    /// No program with that id is registered on the remote.
    ProgramUnavailable = 2,
    /// The program exists but has no such procedure.
    ProcedureUnavailable = 3,
    /// The request could not be placed on the wire.
    SendFailure = 4,
    /// A descriptor was received but could not be interpreted.
    ReceiveFailure = 5,
    /// No reply arrived within the caller's window.
    TimedOut = 6,
    /// The program is registered at a different version.
    VersionMismatch = 7,
    /// The remote could not allocate the result.
    OutOfMemory = 8,
    /// The call was accepted and is still executing.
    Processing = 9,
    /// The remote cannot accept more requests right now.
    QueueFull = 10,
    /// The subsystem is not (or no longer) initialized.
    NotInitialized = 11,
    /// The call was cancelled locally.
    Cancelled = 12,
    /// A program with that id is already registered.
    AlreadyRegistered = 13,
}

impl Status {
    /// Wire encoding.
    #[inline]
    pub fn as_wire(self) -> u16 {
        self as u16
    }

    /// Decode a wire status, rejecting unknown values.
    pub fn from_wire(value: u16) -> Option<Status> {
        Some(match value {
            0 => Status::Success,
            1 => Status::InvalidHandle,
            2 => Status::ProgramUnavailable,
            3 => Status::ProcedureUnavailable,
            4 => Status::SendFailure,
            5 => Status::ReceiveFailure,
            6 => Status::TimedOut,
            7 => Status::VersionMismatch,
            8 => Status::OutOfMemory,
            9 => Status::Processing,
            10 => Status::QueueFull,
            11 => Status::NotInitialized,
            12 => Status::Cancelled,
            13 => Status::AlreadyRegistered,
            _ => return None,
        })
    }

    /// True for `Success`.
    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Success => "success",
            Status::InvalidHandle => "invalid handle",
            Status::ProgramUnavailable => "program not registered",
            Status::ProcedureUnavailable => "procedure not registered",
            Status::SendFailure => "send failed",
            Status::ReceiveFailure => "receive failed",
            Status::TimedOut => "timed out",
            Status::VersionMismatch => "version mismatch",
            Status::OutOfMemory => "remote out of memory",
            Status::Processing => "still processing",
            Status::QueueFull => "remote queue full",
            Status::NotInitialized => "not initialized",
            Status::Cancelled => "cancelled",
            Status::AlreadyRegistered => "program already registered",
        };
        f.write_str(text)
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip_is_exact() {
        for value in 0..=13u16 {
            let status = Status::from_wire(value).unwrap();
            assert_eq!(status.as_wire(), value);
        }
        assert_eq!(Status::from_wire(14), None);
        assert_eq!(Status::from_wire(u16::MAX), None);
    }

    #[test]
    fn timeout_and_unavailable_are_distinct() {
        assert_ne!(Status::TimedOut, Status::ProgramUnavailable);
        assert!(!Status::TimedOut.is_success());
        assert!(Status::Success.is_success());
    }
}
