use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;

use crate::backend::{Backend, Library};
use crate::channel::{Channel, ChannelCloser};
use crate::config::ChannelConfig;
use crate::control::{Mode, Speed};
use crate::drivers::CanDriver;
use crate::error::{Result, VscanError};
use crate::frame::Frame;

/// VSCAN driver for async callers.
///
/// Every channel call runs on tokio's blocking pool, so a read that waits on
/// the adapter never stalls the runtime. A read future dropped early (e.g. by
/// a `select!` timeout) keeps its blocking call running; `close_channel` and
/// [`VscanDriver::closer`] close the handle without taking the channel lock,
/// which makes such a call fail and return.
pub struct VscanDriver<B: Backend + ?Sized + 'static = Library> {
    backend: Arc<B>,
    port: String,
    mode: Mode,
    configured_speed: Option<Speed>,
    timestamps: bool,
    blocking_read: bool,
    channel: Option<Arc<Mutex<Channel<B>>>>,
    closer: Option<ChannelCloser<B>>,
}

impl VscanDriver<Library> {
    /// Load the vendor library and prepare a driver for `port` (e.g. "COM3").
    pub async fn open(port: &str) -> io::Result<Self> {
        let library = tokio::task::spawn_blocking(Library::load)
            .await
            .map_err(VscanError::from)??;
        Ok(Self::with_backend(Arc::new(library), port, Mode::Normal))
    }
}

impl<B: Backend + ?Sized + 'static> VscanDriver<B> {
    /// Nothing touches the adapter until `open_channel`.
    pub fn with_backend(backend: Arc<B>, port: &str, mode: Mode) -> Self {
        Self {
            backend,
            port: port.to_string(),
            mode,
            configured_speed: None,
            timestamps: false,
            blocking_read: false,
            channel: None,
            closer: None,
        }
    }

    /// Make reads wait for traffic. Takes effect at the next `open_channel`.
    pub fn set_blocking_read(&mut self, enabled: bool) {
        self.blocking_read = enabled;
    }

    /// Closes the open channel from another task, cancelling a pending read.
    pub fn closer(&self) -> Option<ChannelCloser<B>> {
        self.closer.clone()
    }

    pub fn is_open(&self) -> bool {
        self.closer.as_ref().is_some_and(|c| c.is_open())
    }

    fn channel(&self, operation: &'static str) -> Result<Arc<Mutex<Channel<B>>>> {
        self.channel
            .clone()
            .ok_or(VscanError::InvalidState { operation })
    }

    /// Run `f` against the channel on the blocking pool.
    async fn with_channel<T, F>(&self, operation: &'static str, f: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Channel<B>) -> Result<T> + Send + 'static,
    {
        let channel = self.channel(operation)?;
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = channel.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut *guard)
        })
        .await
        .map_err(VscanError::from)?;
        Ok(result?)
    }
}

#[async_trait]
impl<B: Backend + ?Sized + 'static> CanDriver for VscanDriver<B> {
    async fn enable_timestamp(&mut self) -> io::Result<()> {
        self.timestamps = true;
        if self.channel.is_some() {
            self.with_channel("set timestamps", |c| c.set_timestamps(true))
                .await?;
        }
        Ok(())
    }

    async fn set_bitrate(&mut self, bitrate: u32) -> io::Result<()> {
        let speed = Speed::from_bitrate(bitrate).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Unsupported CAN bitrate: {}", bitrate),
            )
        })?;
        self.configured_speed = Some(speed);

        // Before open_channel the speed is only remembered; it is applied on open.
        if self.channel.is_some() {
            self.with_channel("set speed", move |c| c.set_speed(speed))
                .await?;
        }
        Ok(())
    }

    async fn get_bitrate(&self) -> Option<u32> {
        self.configured_speed.map(Speed::bitrate)
    }

    async fn open_channel(&mut self) -> io::Result<()> {
        if self.is_open() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("VSCAN channel {} is already open", self.port),
            ));
        }

        let config = ChannelConfig {
            port: self.port.clone(),
            mode: self.mode,
            speed: self.configured_speed,
            timestamps: self.timestamps.then_some(true),
            blocking_read: self.blocking_read.then_some(true),
        };
        let backend = self.backend.clone();
        let channel = tokio::task::spawn_blocking(move || config.open(backend))
            .await
            .map_err(VscanError::from)??;

        debug!("VSCAN driver opened {}", self.port);
        self.closer = Some(channel.closer());
        self.channel = Some(Arc::new(Mutex::new(channel)));
        Ok(())
    }

    async fn send_frames(&mut self, frames: &[Frame]) -> io::Result<usize> {
        let frames = frames.to_vec();
        self.with_channel("write", move |c| c.write(&frames)).await
    }

    async fn read_frames(&mut self) -> io::Result<Vec<Frame>> {
        self.with_channel("read", |c| c.read()).await
    }

    async fn close_channel(&mut self) -> io::Result<()> {
        let closer = self
            .closer
            .take()
            .ok_or(VscanError::InvalidState { operation: "close" })?;

        // Must close before the channel is dropped; its drop would release first.
        let result = tokio::task::spawn_blocking(move || closer.close())
            .await
            .map_err(VscanError::from);
        self.channel = None;
        result??;
        debug!("VSCAN driver closed {}", self.port);
        Ok(())
    }
}
