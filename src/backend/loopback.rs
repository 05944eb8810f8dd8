//! In-memory backend that behaves like a single adapter per port.
//!
//! Frames written in [`Mode::SelfReception`] come back on the same channel;
//! frames written in [`Mode::Normal`] are only recorded. Faults can be
//! injected to exercise partial writes, malformed batches and device errors.
//! Every backend call is counted so tests can assert that nothing reached
//! the device.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use log::trace;

use super::constants::*;
use super::{Backend, Ioctl, NO_HANDLE, RawHandle};
use crate::control::{ApiVersion, HwParams, Mode, Speed};
use crate::error::ErrorCode;
use crate::frame::RawFrame;

const DEFAULT_PORT: &str = "loopback0";

struct VirtualChannel {
    port: String,
    mode: Mode,
    speed: Option<Speed>,
    timestamps: bool,
    blocking: bool,
    rx: VecDeque<RawFrame>,
    tick: u16,
    flags: u32,
}

impl VirtualChannel {
    fn receive(&mut self, mut frame: RawFrame) {
        self.tick = self.tick.wrapping_add(1);
        if self.timestamps {
            frame.flags |= VSCAN_FLAGS_TIMESTAMP;
            frame.timestamp = self.tick;
        } else {
            frame.flags &= !VSCAN_FLAGS_TIMESTAMP;
            frame.timestamp = 0;
        }
        self.rx.push_back(frame);
    }
}

#[derive(Default)]
struct Faults {
    open: Option<ErrorCode>,
    close: Option<ErrorCode>,
    read: Option<ErrorCode>,
    write: Option<ErrorCode>,
    ioctl: Option<ErrorCode>,
    tx_capacity: Option<usize>,
    read_overreport: usize,
    write_overreport: usize,
}

struct State {
    ports: Option<Vec<String>>,
    next_handle: RawHandle,
    channels: HashMap<RawHandle, VirtualChannel>,
    transmitted: Vec<RawFrame>,
    faults: Faults,
    api_version: ApiVersion,
    hw_params: HwParams,
}

impl State {
    fn port_in_use(&self, port: &str) -> bool {
        self.channels.values().any(|c| c.port == port)
    }
}

pub struct Loopback {
    state: Mutex<State>,
    rx_ready: Condvar,
    calls: AtomicUsize,
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Loopback {
    /// Backend that accepts any port name.
    pub fn new() -> Self {
        Loopback {
            state: Mutex::new(State {
                ports: None,
                next_handle: 1,
                channels: HashMap::new(),
                transmitted: Vec::new(),
                faults: Faults::default(),
                api_version: ApiVersion {
                    major: 1,
                    minor: 9,
                    subminor: 0,
                },
                hw_params: HwParams {
                    serial_nr: 0x0010_2030,
                    hw_version: 0x10,
                    sw_version: 0x24,
                    hw_type: 1,
                },
            }),
            rx_ready: Condvar::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Backend where only `ports` exist; anything else fails with `NO_DEVICE_FOUND`.
    pub fn with_ports(ports: &[&str]) -> Self {
        let backend = Self::new();
        backend.state().ports = Some(ports.iter().map(|p| p.to_string()).collect());
        backend
    }

    /// Number of backend calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn open_channels(&self) -> usize {
        self.state().channels.len()
    }

    /// Every frame accepted for transmission, in order.
    pub fn transmitted(&self) -> Vec<RawFrame> {
        self.state().transmitted.clone()
    }

    /// Deliver `frame` to the channel open on `port`, verbatim apart from the timestamp.
    ///
    /// Returns `false` when no channel has that port open.
    pub fn inject(&self, port: &str, frame: RawFrame) -> bool {
        let mut state = self.state();
        let Some(channel) = state.channels.values_mut().find(|c| c.port == port) else {
            return false;
        };
        channel.receive(frame);
        drop(state);
        self.rx_ready.notify_all();
        true
    }

    /// Speed last set on the channel open on `port`.
    pub fn speed(&self, port: &str) -> Option<Speed> {
        self.channel_on(port, |c| c.speed).flatten()
    }

    pub fn timestamps(&self, port: &str) -> Option<bool> {
        self.channel_on(port, |c| c.timestamps)
    }

    pub fn blocking_read(&self, port: &str) -> Option<bool> {
        self.channel_on(port, |c| c.blocking)
    }

    /// Set controller status bits reported (and cleared) by the next flag query.
    pub fn raise_flags(&self, port: &str, flags: u32) {
        let mut state = self.state();
        if let Some(channel) = state.channels.values_mut().find(|c| c.port == port) {
            channel.flags |= flags;
        }
    }

    pub fn set_api_version(&self, version: ApiVersion) {
        self.state().api_version = version;
    }

    /// Accept at most `capacity` frames per write call.
    pub fn set_tx_capacity(&self, capacity: Option<usize>) {
        self.state().faults.tx_capacity = capacity;
    }

    /// Add `extra` to every count reported by read.
    pub fn set_read_overreport(&self, extra: usize) {
        self.state().faults.read_overreport = extra;
    }

    /// Add `extra` to every count reported by write.
    pub fn set_write_overreport(&self, extra: usize) {
        self.state().faults.write_overreport = extra;
    }

    /// Fail the next open with `code`.
    pub fn fail_open(&self, code: ErrorCode) {
        self.state().faults.open = Some(code);
    }

    /// Report `code` from the next close. The channel is released anyway.
    pub fn fail_close(&self, code: ErrorCode) {
        self.state().faults.close = Some(code);
    }

    pub fn fail_read(&self, code: ErrorCode) {
        self.state().faults.read = Some(code);
    }

    pub fn fail_write(&self, code: ErrorCode) {
        self.state().faults.write = Some(code);
    }

    pub fn fail_ioctl(&self, code: ErrorCode) {
        self.state().faults.ioctl = Some(code);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge every other test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn channel_on<T>(&self, port: &str, f: impl FnOnce(&VirtualChannel) -> T) -> Option<T> {
        self.state().channels.values().find(|c| c.port == port).map(f)
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Backend for Loopback {
    fn open(&self, port: Option<&str>, mode: Mode) -> Result<RawHandle, ErrorCode> {
        self.count();
        let mut state = self.state();
        if let Some(code) = state.faults.open.take() {
            return Err(code);
        }

        let port = match (port, &state.ports) {
            (Some(name), Some(ports)) if !ports.iter().any(|p| p == name) => {
                return Err(ErrorCode::NO_DEVICE_FOUND);
            }
            (Some(name), _) => name.to_string(),
            (None, Some(ports)) => ports
                .iter()
                .find(|p| !state.port_in_use(p))
                .cloned()
                .ok_or(ErrorCode::NO_DEVICE_FOUND)?,
            (None, None) => DEFAULT_PORT.to_string(),
        };
        if state.port_in_use(&port) {
            return Err(ErrorCode::ERR);
        }

        let handle = state.next_handle;
        state.next_handle += 1;
        trace!("loopback: open {port} as handle {handle} ({mode:?})");
        state.channels.insert(
            handle,
            VirtualChannel {
                port,
                mode,
                speed: None,
                timestamps: false,
                blocking: false,
                rx: VecDeque::new(),
                tick: 0,
                flags: 0,
            },
        );
        Ok(handle)
    }

    fn close(&self, handle: RawHandle) -> Result<(), ErrorCode> {
        self.count();
        let mut state = self.state();
        let removed = state.channels.remove(&handle);
        let fault = state.faults.close.take();
        drop(state);
        // Wake any reader blocked on this handle
        self.rx_ready.notify_all();

        if removed.is_none() {
            return Err(ErrorCode::INVALID_HANDLE);
        }
        fault.map_or(Ok(()), Err)
    }

    fn read(&self, handle: RawHandle, buf: &mut [RawFrame]) -> Result<usize, ErrorCode> {
        self.count();
        let mut state = self.state();
        if let Some(code) = state.faults.read.take() {
            return Err(code);
        }

        let blocking = state
            .channels
            .get(&handle)
            .ok_or(ErrorCode::INVALID_HANDLE)?
            .blocking;
        if blocking {
            state = self
                .rx_ready
                .wait_while(state, |s| {
                    s.channels.get(&handle).is_some_and(|c| c.rx.is_empty())
                })
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        let extra = state.faults.read_overreport;
        let channel = state
            .channels
            .get_mut(&handle)
            .ok_or(ErrorCode::INVALID_HANDLE)?;
        let n = buf.len().min(channel.rx.len());
        for (slot, frame) in buf.iter_mut().zip(channel.rx.drain(..n)) {
            *slot = frame;
        }
        Ok(n + extra)
    }

    fn write(&self, handle: RawHandle, frames: &[RawFrame]) -> Result<usize, ErrorCode> {
        self.count();
        let mut state = self.state();
        if let Some(code) = state.faults.write.take() {
            return Err(code);
        }

        let capacity = state.faults.tx_capacity.unwrap_or(usize::MAX);
        let extra = state.faults.write_overreport;
        let channel = state
            .channels
            .get_mut(&handle)
            .ok_or(ErrorCode::INVALID_HANDLE)?;
        if channel.mode == Mode::ListenOnly {
            return Err(ErrorCode::LISTEN_ONLY);
        }

        let accepted = &frames[..frames.len().min(capacity)];
        if channel.mode == Mode::SelfReception {
            for frame in accepted {
                channel.receive(*frame);
            }
        }
        state.transmitted.extend_from_slice(accepted);
        drop(state);
        self.rx_ready.notify_all();
        Ok(accepted.len() + extra)
    }

    fn flush(&self, handle: RawHandle) -> Result<(), ErrorCode> {
        self.count();
        if self.state().channels.contains_key(&handle) {
            Ok(())
        } else {
            Err(ErrorCode::INVALID_HANDLE)
        }
    }

    fn ioctl(&self, handle: RawHandle, request: Ioctl<'_>) -> Result<(), ErrorCode> {
        self.count();
        let mut state = self.state();
        if let Some(code) = state.faults.ioctl.take() {
            return Err(code);
        }

        let api_version = state.api_version;
        let hw_params = state.hw_params;
        if handle == NO_HANDLE {
            return match request {
                Ioctl::GetApiVersion(out) => {
                    *out = api_version;
                    Ok(())
                }
                _ => Err(ErrorCode::INVALID_HANDLE),
            };
        }

        let channel = state
            .channels
            .get_mut(&handle)
            .ok_or(ErrorCode::INVALID_HANDLE)?;
        match request {
            Ioctl::SetSpeed(speed) => channel.speed = Some(speed),
            Ioctl::SetTimestamp(on) => channel.timestamps = on,
            Ioctl::SetBlockingRead(on) => channel.blocking = on,
            Ioctl::GetHwParams(out) => *out = hw_params,
            Ioctl::GetFlags(out) => *out = std::mem::take(&mut channel.flags),
            Ioctl::GetApiVersion(out) => *out = api_version,
        }
        Ok(())
    }

    fn error_string(&self, code: ErrorCode, buf: &mut [u8]) {
        self.count();
        let Some(text) = code.known_description() else {
            return;
        };
        let Some(room) = buf.len().checked_sub(1) else {
            return;
        };
        let n = text.len().min(room);
        buf[..n].copy_from_slice(&text.as_bytes()[..n]);
        buf[n] = 0;
    }
}
