use std::fmt;
use std::io;

use memchr::memchr;

use crate::backend::Backend;
use crate::backend::constants::*;

/// Size of the buffer handed to the backend when resolving a status code to text.
pub const ERROR_STRING_LEN: usize = VSCAN_ERROR_STRING_LEN;

/// Signed status code reported by the VSCAN backend.
///
/// Negative values denote failure. The value is kept verbatim; control flow
/// should branch on it (or on the associated constants), never on its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const OK: ErrorCode = ErrorCode(VSCAN_ERR_OK);
    pub const ERR: ErrorCode = ErrorCode(VSCAN_ERR_ERR);
    pub const NO_DEVICE_FOUND: ErrorCode = ErrorCode(VSCAN_ERR_NO_DEVICE_FOUND);
    pub const SUBAPI: ErrorCode = ErrorCode(VSCAN_ERR_SUBAPI);
    pub const NOT_ENOUGH_MEMORY: ErrorCode = ErrorCode(VSCAN_ERR_NOT_ENOUGH_MEMORY);
    pub const NO_ELEMENT_FOUND: ErrorCode = ErrorCode(VSCAN_ERR_NO_ELEMENT_FOUND);
    pub const INVALID_HANDLE: ErrorCode = ErrorCode(VSCAN_ERR_INVALID_HANDLE);
    pub const IOCTL: ErrorCode = ErrorCode(VSCAN_ERR_IOCTL);
    pub const MUTEX: ErrorCode = ErrorCode(VSCAN_ERR_MUTEX);
    pub const CMD: ErrorCode = ErrorCode(VSCAN_ERR_CMD);
    pub const LISTEN_ONLY: ErrorCode = ErrorCode(VSCAN_ERR_LISTEN_ONLY);
    pub const NOT_SUPPORTED: ErrorCode = ErrorCode(VSCAN_ERR_NOT_SUPPORTED);
    pub const GOTO_ERROR: ErrorCode = ErrorCode(VSCAN_ERR_GOTO_ERROR);

    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Turn a raw backend status into `Ok(status)` or `Err(code)`.
    pub fn check(status: i32) -> std::result::Result<i32, ErrorCode> {
        if status < 0 {
            Err(ErrorCode(status))
        } else {
            Ok(status)
        }
    }

    /// Text for the documented status codes, without asking the backend.
    pub fn known_description(self) -> Option<&'static str> {
        Some(match self.0 {
            VSCAN_ERR_OK => "Ok",
            VSCAN_ERR_ERR => "Error",
            VSCAN_ERR_NO_DEVICE_FOUND => "No device found",
            VSCAN_ERR_SUBAPI => "Error in sub-API",
            VSCAN_ERR_NOT_ENOUGH_MEMORY => "Not enough memory",
            VSCAN_ERR_NO_ELEMENT_FOUND => "No element found",
            VSCAN_ERR_INVALID_HANDLE => "Invalid handle",
            VSCAN_ERR_IOCTL => "Ioctl error",
            VSCAN_ERR_MUTEX => "Mutex error",
            VSCAN_ERR_CMD => "Command error",
            VSCAN_ERR_LISTEN_ONLY => "Channel is in listen only mode",
            VSCAN_ERR_NOT_SUPPORTED => "Not supported",
            VSCAN_ERR_GOTO_ERROR => "Goto error",
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known_description() {
            Some(text) => write!(f, "{text} ({})", self.0),
            None => write!(f, "unknown error {}", self.0),
        }
    }
}

/// Resolve `code` through the backend's own string table.
///
/// This is a round trip into the backend and is meant for logs and messages
/// only. An empty or unreadable answer degrades to `unknown error <code>`.
pub fn describe<B: Backend + ?Sized>(backend: &B, code: ErrorCode) -> String {
    let mut buf = [0u8; ERROR_STRING_LEN];
    backend.error_string(code, &mut buf);

    let end = memchr(0, &buf).unwrap_or(buf.len());
    let text = String::from_utf8_lossy(&buf[..end]);
    let text = text.trim();
    if text.is_empty() {
        format!("unknown error {}", code.0)
    } else {
        text.to_string()
    }
}

/// Integrity failures in data handed back by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// Batch entry `index` declared a payload longer than 8 bytes.
    PayloadLength { index: usize, len: u8 },
    /// The backend reported more entries than the buffer it was given.
    CountOverrun { reported: usize, capacity: usize },
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformed::PayloadLength { index, len } => {
                write!(f, "frame {index} declares payload length {len} (max 8)")
            }
            Malformed::CountOverrun { reported, capacity } => write!(
                f,
                "backend reported {reported} frames for a buffer of {capacity}"
            ),
        }
    }
}

#[derive(Debug)]
pub enum VscanError {
    /// A caller supplied value violates a documented constraint. Nothing was sent.
    InvalidArgument(String),
    /// The channel is not open.
    InvalidState { operation: &'static str },
    /// The backend rejected the call.
    Device(ErrorCode),
    /// The backend returned data that violates the frame invariants.
    MalformedFrame(Malformed),
    /// The vendor library could not be loaded or lacks a required symbol.
    Load(libloading::Error),
    /// A blocking task running a channel call did not complete.
    Worker(tokio::task::JoinError),
}

impl VscanError {
    /// The backend status code, for `Device` errors.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            VscanError::Device(code) => Some(*code),
            _ => None,
        }
    }

    /// Like `Display`, but resolves device codes through the backend's string table.
    pub fn describe_with<B: Backend + ?Sized>(&self, backend: &B) -> String {
        match self {
            VscanError::Device(code) => {
                format!("VSCAN device error {}: {}", code.0, describe(backend, *code))
            }
            other => other.to_string(),
        }
    }
}

impl From<ErrorCode> for VscanError {
    fn from(code: ErrorCode) -> Self {
        VscanError::Device(code)
    }
}

impl From<libloading::Error> for VscanError {
    fn from(err: libloading::Error) -> Self {
        VscanError::Load(err)
    }
}

impl From<tokio::task::JoinError> for VscanError {
    fn from(err: tokio::task::JoinError) -> Self {
        VscanError::Worker(err)
    }
}

impl fmt::Display for VscanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VscanError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            VscanError::InvalidState { operation } => {
                write!(f, "Cannot {operation}: channel is not open")
            }
            VscanError::Device(code) => write!(f, "VSCAN device error: {code}"),
            VscanError::MalformedFrame(what) => write!(f, "Malformed frame: {what}"),
            VscanError::Load(err) => write!(f, "Failed to load VSCAN library: {err}"),
            VscanError::Worker(err) => write!(f, "VSCAN worker task failed: {err}"),
        }
    }
}

impl std::error::Error for VscanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VscanError::Load(err) => Some(err),
            VscanError::Worker(err) => Some(err),
            _ => None,
        }
    }
}

impl From<VscanError> for io::Error {
    fn from(err: VscanError) -> Self {
        let kind = match &err {
            VscanError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            VscanError::InvalidState { .. } => io::ErrorKind::NotConnected,
            VscanError::MalformedFrame(_) => io::ErrorKind::InvalidData,
            VscanError::Load(_) => io::ErrorKind::NotFound,
            VscanError::Device(_) | VscanError::Worker(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, VscanError>;
