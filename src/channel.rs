//! An open VSCAN channel and its batched frame I/O.
//!
//! All calls are synchronous and run on the caller's thread. With blocking
//! reads enabled, [`Channel::read`] waits as long as the adapter lets it;
//! this layer adds no timeout of its own. Callers that need bounded latency
//! run reads on a dedicated thread and cancel them by closing the channel
//! through a [`ChannelCloser`], which makes the blocked read fail with a
//! device error. Closing is final: a closed channel cannot be reopened.
//!
//! A channel has a single owner (`&mut self` for I/O). Concurrent readers
//! and writers must share it behind their own mutex.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace, warn};

use crate::backend::{Backend, Library, RawHandle};
use crate::control::Mode;
use crate::error::{Malformed, Result, VscanError};
use crate::frame::{Frame, RawFrame};

/// Most frames drained by a single [`Channel::read`].
///
/// Frames beyond this stay queued in the adapter until the next call, so a
/// caller that polls slower than `READ_CAPACITY` frames per interval lets the
/// adapter's receive queue fill up.
pub const READ_CAPACITY: usize = 32;

/// An open session on one adapter port. Closed on drop if still open.
pub struct Channel<B: Backend + ?Sized = Library> {
    backend: Arc<B>,
    handle: RawHandle,
    port: String,
    mode: Mode,
    open: Arc<AtomicBool>,
}

impl<B: Backend + ?Sized> Channel<B> {
    /// Open `port` in `mode`. An empty port selects the first adapter found.
    pub fn open(backend: Arc<B>, port: &str, mode: Mode) -> Result<Self> {
        if port.contains('\0') {
            return Err(VscanError::InvalidArgument(format!(
                "port name {port:?} contains a NUL byte"
            )));
        }
        let requested = (!port.is_empty()).then_some(port);
        let handle = backend.open(requested, mode)?;
        debug!("Opened VSCAN channel {port:?} as handle {handle} ({mode:?})");

        Ok(Channel {
            backend,
            handle,
            port: port.to_string(),
            mode,
            open: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn raw_handle(&self) -> RawHandle {
        self.handle
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Release the channel.
    ///
    /// The channel is unusable afterwards even when the backend reports a
    /// failure. A second close fails with `InvalidState`.
    pub fn close(&mut self) -> Result<()> {
        release(&*self.backend, self.handle, &self.open)?;
        debug!("Closed VSCAN channel {:?}", self.port);
        Ok(())
    }

    /// A handle that can close this channel from another thread.
    pub fn closer(&self) -> ChannelCloser<B> {
        ChannelCloser {
            backend: self.backend.clone(),
            handle: self.handle,
            open: self.open.clone(),
        }
    }

    pub(crate) fn live_handle(&self, operation: &'static str) -> Result<RawHandle> {
        if self.is_open() {
            Ok(self.handle)
        } else {
            Err(VscanError::InvalidState { operation })
        }
    }

    /// Drain up to [`READ_CAPACITY`] received frames, oldest first.
    ///
    /// An empty vector means nothing was pending. If any entry of the batch
    /// is malformed the whole batch is rejected.
    pub fn read(&mut self) -> Result<Vec<Frame>> {
        let handle = self.live_handle("read")?;
        let mut buf = [RawFrame::default(); READ_CAPACITY];
        let reported = self.backend.read(handle, &mut buf)?;
        let frames = decode_batch(&buf, reported)?;
        if !frames.is_empty() {
            trace!("{}: read {} frames", self.port, frames.len());
        }
        Ok(frames)
    }

    /// Submit `frames` as one batch and return how many the adapter accepted.
    ///
    /// A count below `frames.len()` is not an error: the first `count` frames
    /// were taken and the caller decides whether to resubmit the rest.
    pub fn write(&mut self, frames: &[Frame]) -> Result<usize> {
        let handle = self.live_handle("write")?;
        if frames.is_empty() {
            return Ok(0);
        }

        let batch: Vec<RawFrame> = frames.iter().map(Frame::to_raw).collect();
        let written = self.backend.write(handle, &batch)?;
        if written > batch.len() {
            warn!(
                "{}: backend reported {} frames written for a batch of {}",
                self.port,
                written,
                batch.len()
            );
            return Ok(batch.len());
        }
        if written < batch.len() {
            debug!("{}: partial write {}/{}", self.port, written, batch.len());
        } else {
            trace!("{}: wrote {} frames", self.port, written);
        }
        Ok(written)
    }

    /// Push frames buffered by the adapter out to the bus.
    pub fn flush(&mut self) -> Result<()> {
        let handle = self.live_handle("flush")?;
        self.backend.flush(handle)?;
        Ok(())
    }
}

/// Validate the first `reported` entries of `buf`.
///
/// Entries are indexed by stride; a bad length in one entry never shifts
/// the entries after it.
pub(crate) fn decode_batch(buf: &[RawFrame], reported: usize) -> Result<Vec<Frame>> {
    if reported > buf.len() {
        return Err(VscanError::MalformedFrame(Malformed::CountOverrun {
            reported,
            capacity: buf.len(),
        }));
    }
    buf[..reported]
        .iter()
        .enumerate()
        .map(|(index, raw)| Frame::decode(raw, index))
        .collect()
}

fn release<B: Backend + ?Sized>(backend: &B, handle: RawHandle, open: &AtomicBool) -> Result<()> {
    if !open.swap(false, Ordering::AcqRel) {
        return Err(VscanError::InvalidState { operation: "close" });
    }
    backend.close(handle)?;
    Ok(())
}

impl<B: Backend + ?Sized> fmt::Debug for Channel<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("port", &self.port)
            .field("handle", &self.handle)
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .finish()
    }
}

impl<B: Backend + ?Sized> Drop for Channel<B> {
    fn drop(&mut self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        match self.backend.close(self.handle) {
            Ok(()) => debug!("Closed VSCAN channel {:?} on drop", self.port),
            Err(code) => warn!("Closing VSCAN channel {:?} on drop failed: {code}", self.port),
        }
    }
}

/// Closes a [`Channel`] from any thread, e.g. to cancel a blocked read.
///
/// Whichever of the channel, its drop or any closer gets there first does
/// the close; everyone else sees `InvalidState`.
pub struct ChannelCloser<B: Backend + ?Sized = Library> {
    backend: Arc<B>,
    handle: RawHandle,
    open: Arc<AtomicBool>,
}

impl<B: Backend + ?Sized> ChannelCloser<B> {
    pub fn close(&self) -> Result<()> {
        release(&*self.backend, self.handle, &self.open)?;
        debug!("Closed VSCAN handle {} from closer", self.handle);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl<B: Backend + ?Sized> Clone for ChannelCloser<B> {
    fn clone(&self) -> Self {
        ChannelCloser {
            backend: self.backend.clone(),
            handle: self.handle,
            open: self.open.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFlags;

    fn raw(id: u32, size: u8) -> RawFrame {
        RawFrame {
            id,
            size,
            flags: FrameFlags::STANDARD.bits(),
            ..RawFrame::default()
        }
    }

    #[test]
    fn decode_batch_rejects_overrun_count() {
        let buf = [raw(1, 0); 4];
        let err = decode_batch(&buf, 5).unwrap_err();
        assert!(matches!(
            err,
            VscanError::MalformedFrame(Malformed::CountOverrun {
                reported: 5,
                capacity: 4
            })
        ));
    }

    #[test]
    fn decode_batch_fails_whole_batch_on_bad_entry() {
        let buf = [raw(1, 2), raw(2, 15), raw(3, 8)];
        let err = decode_batch(&buf, 3).unwrap_err();
        assert!(matches!(
            err,
            VscanError::MalformedFrame(Malformed::PayloadLength { index: 1, len: 15 })
        ));
    }

    #[test]
    fn decode_batch_only_looks_at_reported_entries() {
        // Garbage past the reported count is never inspected
        let buf = [raw(1, 2), raw(2, 200)];
        let frames = decode_batch(&buf, 1).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), 1);
    }
}
