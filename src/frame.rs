//! Classic CAN frame value type and the fixed layout the backend exchanges.
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::backend::constants::*;
use crate::error::{Malformed, Result, VscanError};

/// Largest classic CAN payload.
pub const MAX_PAYLOAD: usize = CAN_MAX_DLEN;

bitflags! {
    /// Per-frame flags as reported and accepted by the adapter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FrameFlags: u8 {
        const STANDARD = VSCAN_FLAGS_STANDARD;
        const EXTENDED = VSCAN_FLAGS_EXTENDED;
        const REMOTE = VSCAN_FLAGS_REMOTE;
        /// `timestamp` carries a device tick.
        const TIMESTAMP = VSCAN_FLAGS_TIMESTAMP;
    }
}

/// One `VSCAN_MSG` exactly as the vendor library lays it out in memory.
///
/// Fields are in host byte order: id(4) + size(1) + data(8) + flags(1) + timestamp(2).
/// The fields happen to be naturally aligned, so `repr(C)` adds no padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub id: u32,
    pub size: u8,
    pub data: [u8; 8],
    pub flags: u8,
    pub timestamp: u16,
}

const _: () = assert!(std::mem::size_of::<RawFrame>() == 16);

/// A validated CAN frame. Payload bytes past `len()` are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "FrameRepr", into = "FrameRepr")]
pub struct Frame {
    id: u32,
    len: u8,
    data: [u8; 8],
    flags: FrameFlags,
    timestamp: u16,
}

impl Frame {
    /// Standard (11-bit) data frame.
    pub fn new(id: u32, data: &[u8]) -> Result<Frame> {
        if id > CAN_SFF_MASK {
            return Err(VscanError::InvalidArgument(format!(
                "standard id 0x{id:X} exceeds 0x{CAN_SFF_MASK:X}"
            )));
        }
        Self::with_flags(id, data, FrameFlags::STANDARD)
    }

    /// Extended (29-bit) data frame.
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Frame> {
        if id > CAN_EFF_MASK {
            return Err(VscanError::InvalidArgument(format!(
                "extended id 0x{id:X} exceeds 0x{CAN_EFF_MASK:X}"
            )));
        }
        Self::with_flags(id, data, FrameFlags::EXTENDED)
    }

    /// Remote transmission request for `len` bytes. No payload is carried.
    pub fn new_remote(id: u32, len: u8, extended: bool) -> Result<Frame> {
        let mut frame = if extended {
            Self::new_extended(id, &[])?
        } else {
            Self::new(id, &[])?
        };
        check_len(len as usize)?;
        frame.len = len;
        frame.flags |= FrameFlags::REMOTE;
        Ok(frame)
    }

    /// Frame with caller-chosen flags; only the payload length is checked.
    /// With `REMOTE` set the length is kept but the bytes are zeroed.
    pub fn with_flags(id: u32, data: &[u8], flags: FrameFlags) -> Result<Frame> {
        check_len(data.len())?;
        let mut payload = [0u8; 8];
        if !flags.contains(FrameFlags::REMOTE) {
            payload[..data.len()].copy_from_slice(data);
        }
        Ok(Frame {
            id,
            len: data.len() as u8,
            data: payload,
            flags,
            timestamp: 0,
        })
    }

    /// Build from the parts of a `VSCAN_MSG`; only the first `len` bytes of `payload` are kept.
    pub fn from_parts(id: u32, len: u8, payload: [u8; 8], flags: FrameFlags) -> Result<Frame> {
        check_len(len as usize)?;
        Self::with_flags(id, &payload[..len as usize], flags)
    }

    /// Validate entry `index` of a batch returned by the backend.
    pub(crate) fn decode(raw: &RawFrame, index: usize) -> Result<Frame> {
        let len = raw.size as usize;
        if len > MAX_PAYLOAD {
            return Err(VscanError::MalformedFrame(Malformed::PayloadLength {
                index,
                len: raw.size,
            }));
        }
        let flags = FrameFlags::from_bits_retain(raw.flags);
        let mut data = [0u8; 8];
        if !flags.contains(FrameFlags::REMOTE) {
            data[..len].copy_from_slice(&raw.data[..len]);
        }
        Ok(Frame {
            id: raw.id,
            len: raw.size,
            data,
            flags,
            timestamp: raw.timestamp,
        })
    }

    /// Layout handed to the backend. Bytes past `len()` are zeroed.
    pub fn to_raw(&self) -> RawFrame {
        let mut data = [0u8; 8];
        if !self.is_remote() {
            data[..self.len as usize].copy_from_slice(self.data());
        }
        RawFrame {
            id: self.id,
            size: self.len,
            data,
            flags: self.flags.bits(),
            timestamp: self.timestamp,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn is_extended(&self) -> bool {
        self.flags.contains(FrameFlags::EXTENDED)
    }

    pub fn is_remote(&self) -> bool {
        self.flags.contains(FrameFlags::REMOTE)
    }

    /// Device-relative tick, meaningful when [`FrameFlags::TIMESTAMP`] is set.
    pub fn timestamp(&self) -> Option<u16> {
        self.flags
            .contains(FrameFlags::TIMESTAMP)
            .then_some(self.timestamp)
    }
}

impl TryFrom<&RawFrame> for Frame {
    type Error = VscanError;

    fn try_from(raw: &RawFrame) -> Result<Frame> {
        Frame::decode(raw, 0)
    }
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_PAYLOAD {
        return Err(VscanError::InvalidArgument(format!(
            "payload length {len} exceeds {MAX_PAYLOAD}"
        )));
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct FrameRepr {
    id: u32,
    #[serde(default)]
    data: Vec<u8>,
    #[serde(default)]
    flags: FrameFlags,
    #[serde(default)]
    timestamp: u16,
}

impl TryFrom<FrameRepr> for Frame {
    type Error = VscanError;

    fn try_from(repr: FrameRepr) -> Result<Frame> {
        let mut frame = Frame::with_flags(repr.id, &repr.data, repr.flags)?;
        frame.timestamp = repr.timestamp;
        Ok(frame)
    }
}

impl From<Frame> for FrameRepr {
    fn from(frame: Frame) -> Self {
        FrameRepr {
            id: frame.id,
            data: frame.data().to_vec(),
            flags: frame.flags,
            timestamp: frame.timestamp,
        }
    }
}
