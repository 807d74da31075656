//! Fixed-layout message descriptors.
//!
//! A descriptor is the unit the rings carry: one cache-line-multiple
//! `#[repr(C)]` record with the RPC address, the correlation xid, a wire
//! status, and an inline payload. Nothing in a received descriptor is
//! trusted: [`MsgDesc::validate`] bounds-checks it before any field is
//! interpreted.

use core::fmt;
use core::mem::size_of;

/// Maximum payload carried inline in one descriptor.
pub const MAX_PAYLOAD: usize = 232;

/// Descriptor size in bytes (four cache lines).
pub const DESC_SIZE: usize = 256;

/// Descriptor kind values.
pub mod kind {
    /// A procedure call (carries program/version/procedure).
    pub const CALL: u8 = 1;
    /// A reply (carries the wire status).
    pub const REPLY: u8 = 2;
}

/// Descriptor flag bits.
pub mod flags {
    /// Fire-and-forget call: the server sends no reply.
    pub const ONEWAY: u8 = 1;
}

/// One ring entry.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MsgDesc {
    /// Descriptor kind ([`kind`]).
    pub kind: u8,
    /// Flag bits ([`flags`]).
    pub flags: u8,
    /// Wire status (replies; zero on calls).
    pub status: u16,
    /// Transport handle correlating a call with its reply.
    pub xid: u32,
    /// Program id.
    pub program: u32,
    /// Program version the caller was built against.
    pub version: u32,
    /// Procedure number within the program.
    pub procedure: u32,
    /// Valid bytes in `payload`.
    pub payload_len: u32,
    /// Inline argument or result bytes.
    pub payload: [u8; MAX_PAYLOAD],
}

const _: () = assert!(size_of::<MsgDesc>() == DESC_SIZE);

/// A descriptor that failed validation or construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgError {
    /// Unknown descriptor kind byte.
    UnknownKind(u8),
    /// Claimed payload length exceeds the inline capacity.
    PayloadOutOfBounds(u32),
    /// Payload passed to a constructor does not fit a descriptor.
    PayloadTooLarge(usize),
}

impl fmt::Display for MsgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgError::UnknownKind(k) => write!(f, "unknown descriptor kind: {k}"),
            MsgError::PayloadOutOfBounds(len) => {
                write!(f, "payload length {len} exceeds descriptor capacity {MAX_PAYLOAD}")
            }
            MsgError::PayloadTooLarge(len) => {
                write!(f, "payload of {len} bytes does not fit descriptor ({MAX_PAYLOAD} max)")
            }
        }
    }
}

impl std::error::Error for MsgError {}

impl MsgDesc {
    fn with_payload(mut self, payload: &[u8]) -> Result<Self, MsgError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(MsgError::PayloadTooLarge(payload.len()));
        }
        self.payload_len = payload.len() as u32;
        self.payload[..payload.len()].copy_from_slice(payload);
        Ok(self)
    }

    fn blank(kind: u8) -> Self {
        Self {
            kind,
            flags: 0,
            status: 0,
            xid: 0,
            program: 0,
            version: 0,
            procedure: 0,
            payload_len: 0,
            payload: [0; MAX_PAYLOAD],
        }
    }

    /// Build a call descriptor.
    pub fn call(
        xid: u32,
        program: u32,
        version: u32,
        procedure: u32,
        args: &[u8],
    ) -> Result<Self, MsgError> {
        let mut desc = Self::blank(kind::CALL);
        desc.xid = xid;
        desc.program = program;
        desc.version = version;
        desc.procedure = procedure;
        desc.with_payload(args)
    }

    /// Build a reply descriptor.
    pub fn reply(xid: u32, status: u16, result: &[u8]) -> Result<Self, MsgError> {
        let mut desc = Self::blank(kind::REPLY);
        desc.xid = xid;
        desc.status = status;
        desc.with_payload(result)
    }

    /// Mark this call fire-and-forget.
    pub fn oneway(mut self) -> Self {
        self.flags |= flags::ONEWAY;
        self
    }

    /// True if the ONEWAY flag is set.
    #[inline]
    pub fn is_oneway(&self) -> bool {
        self.flags & flags::ONEWAY != 0
    }

    /// Bounds-check a received descriptor before interpreting it.
    pub fn validate(&self) -> Result<(), MsgError> {
        match self.kind {
            kind::CALL | kind::REPLY => {}
            other => return Err(MsgError::UnknownKind(other)),
        }
        if self.payload_len as usize > MAX_PAYLOAD {
            return Err(MsgError::PayloadOutOfBounds(self.payload_len));
        }
        Ok(())
    }

    /// The valid payload bytes.
    ///
    /// Panics if the descriptor was not validated; call
    /// [`MsgDesc::validate`] on anything read off a ring first.
    #[inline]
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload[..self.payload_len as usize]
    }
}

impl fmt::Debug for MsgDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgDesc")
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("status", &self.status)
            .field("xid", &self.xid)
            .field("program", &format_args!("{:#x}", self.program))
            .field("version", &self.version)
            .field("procedure", &self.procedure)
            .field("payload_len", &self.payload_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_carries_address_and_args() {
        let desc = MsgDesc::call(7, 0x100, 2, 3, b"abc").unwrap();
        desc.validate().unwrap();
        assert_eq!(desc.kind, kind::CALL);
        assert_eq!((desc.program, desc.version, desc.procedure), (0x100, 2, 3));
        assert_eq!(desc.payload_bytes(), b"abc");
        assert!(!desc.is_oneway());
        assert!(desc.oneway().is_oneway());
    }

    #[test]
    fn oversize_payload_rejected_at_construction() {
        let big = [0u8; MAX_PAYLOAD + 1];
        assert_eq!(
            MsgDesc::call(1, 1, 1, 1, &big),
            Err(MsgError::PayloadTooLarge(MAX_PAYLOAD + 1))
        );
        let exact = [0u8; MAX_PAYLOAD];
        assert!(MsgDesc::reply(1, 0, &exact).is_ok());
    }

    #[test]
    fn received_descriptor_is_not_trusted() {
        let mut desc = MsgDesc::reply(9, 0, b"ok").unwrap();
        desc.payload_len = u32::MAX;
        assert_eq!(desc.validate(), Err(MsgError::PayloadOutOfBounds(u32::MAX)));

        let mut desc = MsgDesc::call(9, 1, 1, 1, b"").unwrap();
        desc.kind = 0x7F;
        assert_eq!(desc.validate(), Err(MsgError::UnknownKind(0x7F)));
    }
}
