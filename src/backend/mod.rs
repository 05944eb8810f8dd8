//! The seam between the channel layer and whatever actually talks to the adapter.
//!
//! A [`Backend`] mirrors the handle-based vendor API one call at a time: it
//! knows nothing about channel lifecycle, frame validation or batching
//! policy. Those belong to [`crate::channel::Channel`].
pub(crate) mod constants;
pub mod library;
#[cfg(any(test, feature = "loopback"))]
pub mod loopback;

pub use library::Library;
#[cfg(any(test, feature = "loopback"))]
pub use loopback::Loopback;

use crate::control::{ApiVersion, HwParams, Mode, Speed};
use crate::error::ErrorCode;
use crate::frame::RawFrame;

/// Backend-assigned channel identifier (`VSCAN_HANDLE`).
pub type RawHandle = i32;

/// Handle value used for requests that are not bound to a channel.
pub const NO_HANDLE: RawHandle = 0;

/// Out-of-band control requests (`VSCAN_Ioctl`).
#[derive(Debug)]
pub enum Ioctl<'a> {
    SetSpeed(Speed),
    SetTimestamp(bool),
    SetBlockingRead(bool),
    GetHwParams(&'a mut HwParams),
    GetFlags(&'a mut u32),
    GetApiVersion(&'a mut ApiVersion),
}

impl Ioctl<'_> {
    /// Numeric request code understood by the vendor library.
    pub fn request(&self) -> u32 {
        use constants::*;
        match self {
            Ioctl::SetSpeed(_) => VSCAN_IOCTL_SET_SPEED,
            Ioctl::SetTimestamp(_) => VSCAN_IOCTL_SET_TIMESTAMP,
            Ioctl::SetBlockingRead(_) => VSCAN_IOCTL_SET_BLOCKING_READ,
            Ioctl::GetHwParams(_) => VSCAN_IOCTL_GET_HWPARAM,
            Ioctl::GetFlags(_) => VSCAN_IOCTL_GET_FLAGS,
            Ioctl::GetApiVersion(_) => VSCAN_IOCTL_GET_API_VERSION,
        }
    }
}

/// Raw device access, one method per vendor entry point.
///
/// Implementations are called synchronously and may block (`read` in
/// particular, when blocking reads are enabled). They must be callable from
/// any thread, but callers never issue two calls for the same handle at once
/// except `close`, which may race a blocked `read` to cancel it.
pub trait Backend: Send + Sync {
    /// Open `port` (`None` selects the first adapter found).
    fn open(&self, port: Option<&str>, mode: Mode) -> Result<RawHandle, ErrorCode>;

    fn close(&self, handle: RawHandle) -> Result<(), ErrorCode>;

    /// Fill the front of `buf` and return how many entries the backend claims are valid.
    ///
    /// The count is not trusted by callers; it may exceed `buf.len()`.
    fn read(&self, handle: RawHandle, buf: &mut [RawFrame]) -> Result<usize, ErrorCode>;

    /// Queue `frames` for transmission and return how many were accepted.
    fn write(&self, handle: RawHandle, frames: &[RawFrame]) -> Result<usize, ErrorCode>;

    /// Push any buffered frames out to the bus.
    fn flush(&self, handle: RawHandle) -> Result<(), ErrorCode>;

    fn ioctl(&self, handle: RawHandle, request: Ioctl<'_>) -> Result<(), ErrorCode>;

    /// Write the NUL-terminated description of `code` into `buf`.
    ///
    /// Must not fail or block; an unknown code leaves `buf` empty.
    fn error_string(&self, code: ErrorCode, buf: &mut [u8]);
}
