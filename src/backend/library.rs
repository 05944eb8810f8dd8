//! Backend that calls into the vendor `vs_can_api` shared library.
//!
//! The library is loaded at runtime so that the crate builds and tests on
//! machines without the VSCAN driver installed.
use std::ffi::{CString, OsStr};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use libc::c_ulong;
use log::{debug, trace};

use super::{Backend, Ioctl, RawHandle};
use crate::control::{ApiVersion, HwParams, Mode};
use crate::error::{self, ErrorCode};
use crate::frame::RawFrame;

use super::constants::{VSCAN_IOCTL_OFF, VSCAN_IOCTL_ON};

/// Environment variable overriding the library path used by [`Library::load`].
pub const LIBRARY_ENV: &str = "VSCAN_LIBRARY";

type OpenFn = unsafe extern "C" fn(*const c_char, c_ulong) -> c_int;
type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
type TransferFn = unsafe extern "C" fn(c_int, *mut RawFrame, c_ulong, *mut c_ulong) -> c_int;
type FlushFn = unsafe extern "C" fn(c_int) -> c_int;
type IoctlFn = unsafe extern "C" fn(c_int, c_ulong, *mut c_void) -> c_int;
type ErrorStringFn = unsafe extern "C" fn(c_int, *mut c_char, c_ulong);

/// Loaded `vs_can_api` entry points.
///
/// The function pointers stay valid for as long as `_lib` is alive, which is
/// the lifetime of this struct.
pub struct Library {
    open: OpenFn,
    close: CloseFn,
    read: TransferFn,
    write: TransferFn,
    flush: FlushFn,
    ioctl: IoctlFn,
    error_string: ErrorStringFn,
    _lib: libloading::Library,
}

impl Library {
    /// Load from `$VSCAN_LIBRARY`, or the platform's default library name.
    pub fn load() -> error::Result<Self> {
        let path = std::env::var_os(LIBRARY_ENV)
            .unwrap_or_else(|| libloading::library_filename("vs_can_api"));
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<OsStr>) -> error::Result<Self> {
        let path = path.as_ref();
        debug!("Loading VSCAN library from {}", path.to_string_lossy());

        // SAFETY: loading runs the library's initializers; vs_can_api has no
        // constraints on when that happens.
        let lib = unsafe { libloading::Library::new(path)? };

        // SAFETY: the signatures below match vs_can_api.h.
        unsafe {
            let open = *lib.get::<OpenFn>(b"VSCAN_Open\0")?;
            let close = *lib.get::<CloseFn>(b"VSCAN_Close\0")?;
            let read = *lib.get::<TransferFn>(b"VSCAN_Read\0")?;
            let write = *lib.get::<TransferFn>(b"VSCAN_Write\0")?;
            let flush = *lib.get::<FlushFn>(b"VSCAN_Flush\0")?;
            let ioctl = *lib.get::<IoctlFn>(b"VSCAN_Ioctl\0")?;
            let error_string = *lib.get::<ErrorStringFn>(b"VSCAN_GetErrorString\0")?;
            Ok(Library {
                open,
                close,
                read,
                write,
                flush,
                ioctl,
                error_string,
                _lib: lib,
            })
        }
    }

    /// # Safety
    ///
    /// `arg` must be either the request's value smuggled in the pointer, or a
    /// pointer to a live, writable object of the type `request` fills in.
    unsafe fn ioctl_raw(
        &self,
        handle: RawHandle,
        request: u32,
        arg: *mut c_void,
    ) -> Result<(), ErrorCode> {
        // SAFETY: `arg` upholds the request's contract per this function's caller.
        let status = unsafe { (self.ioctl)(handle, request as c_ulong, arg) };
        ErrorCode::check(status).map(drop)
    }
}

fn switch(on: bool) -> u32 {
    if on { VSCAN_IOCTL_ON } else { VSCAN_IOCTL_OFF }
}

impl Backend for Library {
    fn open(&self, port: Option<&str>, mode: Mode) -> Result<RawHandle, ErrorCode> {
        let port = port
            .map(CString::new)
            .transpose()
            .map_err(|_| ErrorCode::ERR)?;
        // A null port asks the library for the first adapter it finds
        let port_ptr = port.as_ref().map_or(ptr::null(), |p| p.as_ptr());
        // SAFETY: `port` owns the NUL-terminated string and outlives the call.
        let status = unsafe { (self.open)(port_ptr, mode.raw() as c_ulong) };
        ErrorCode::check(status)
    }

    fn close(&self, handle: RawHandle) -> Result<(), ErrorCode> {
        // SAFETY: plain value call; the library validates the handle.
        let status = unsafe { (self.close)(handle) };
        ErrorCode::check(status).map(drop)
    }

    fn read(&self, handle: RawHandle, buf: &mut [RawFrame]) -> Result<usize, ErrorCode> {
        let mut read: c_ulong = 0;
        // SAFETY: pointer and length describe `buf`, which the library fills
        // up to `buf.len()` entries. `read` is a live local.
        let status =
            unsafe { (self.read)(handle, buf.as_mut_ptr(), buf.len() as c_ulong, &mut read) };
        ErrorCode::check(status)?;
        trace!("VSCAN_Read({handle}) -> {read}");
        Ok(read as usize)
    }

    fn write(&self, handle: RawHandle, frames: &[RawFrame]) -> Result<usize, ErrorCode> {
        // VSCAN_Write takes a non-const pointer but never writes through it.
        let mut batch = frames.to_vec();
        let mut written: c_ulong = 0;
        // SAFETY: pointer and length describe `batch`; `written` is a live local.
        let status = unsafe {
            (self.write)(
                handle,
                batch.as_mut_ptr(),
                batch.len() as c_ulong,
                &mut written,
            )
        };
        ErrorCode::check(status)?;
        trace!("VSCAN_Write({handle}, {}) -> {written}", batch.len());
        Ok(written as usize)
    }

    fn flush(&self, handle: RawHandle) -> Result<(), ErrorCode> {
        // SAFETY: plain value call; the library validates the handle.
        let status = unsafe { (self.flush)(handle) };
        ErrorCode::check(status).map(drop)
    }

    fn ioctl(&self, handle: RawHandle, request: Ioctl<'_>) -> Result<(), ErrorCode> {
        let code = request.request();
        // Setters pass their value in the pointer argument itself, as the
        // VSCAN_SPEED_* and VSCAN_IOCTL_ON/OFF defines do.
        match request {
            // SAFETY: setters are never dereferenced by the library.
            Ioctl::SetSpeed(speed) => unsafe {
                self.ioctl_raw(handle, code, speed.raw() as usize as *mut c_void)
            },
            // SAFETY: as above.
            Ioctl::SetTimestamp(on) | Ioctl::SetBlockingRead(on) => unsafe {
                self.ioctl_raw(handle, code, switch(on) as usize as *mut c_void)
            },
            // SAFETY: `out` is an exclusive borrow of a repr(C) VSCAN_HWPARAM.
            Ioctl::GetHwParams(out) => unsafe {
                self.ioctl_raw(handle, code, (out as *mut HwParams).cast())
            },
            Ioctl::GetFlags(out) => {
                let mut raw: c_ulong = 0;
                // SAFETY: the library writes one DWORD into the live local `raw`.
                unsafe { self.ioctl_raw(handle, code, &mut raw as *mut c_ulong as *mut c_void)? };
                *out = raw as u32;
                Ok(())
            }
            // SAFETY: `out` is an exclusive borrow of a repr(C) VSCAN_API_VERSION.
            Ioctl::GetApiVersion(out) => unsafe {
                self.ioctl_raw(handle, code, (out as *mut ApiVersion).cast())
            },
        }
    }

    fn error_string(&self, code: ErrorCode, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        // SAFETY: the library writes at most `buf.len()` bytes into `buf`.
        unsafe {
            (self.error_string)(
                code.0,
                buf.as_mut_ptr() as *mut c_char,
                buf.len() as c_ulong,
            )
        };
        // Never trust the library to terminate the string
        if let Some(last) = buf.last_mut() {
            *last = 0;
        }
    }
}
