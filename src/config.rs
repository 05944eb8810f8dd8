//! Declarative channel setup, loadable from any serde format.
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::channel::Channel;
use crate::control::{Mode, Speed};
use crate::error::Result;

/// Everything needed to bring a channel up.
///
/// Settings left as `None` are not sent to the adapter, which keeps its
/// own defaults for them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Adapter port, e.g. `COM3` or `192.168.254.254:2001`. Empty means first found.
    pub port: String,
    pub mode: Mode,
    pub speed: Option<Speed>,
    pub timestamps: Option<bool>,
    pub blocking_read: Option<bool>,
}

impl ChannelConfig {
    pub fn new(port: impl Into<String>) -> Self {
        ChannelConfig {
            port: port.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_speed(mut self, speed: Speed) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = Some(enabled);
        self
    }

    pub fn with_blocking_read(mut self, enabled: bool) -> Self {
        self.blocking_read = Some(enabled);
        self
    }

    /// Open the channel and apply speed, timestamps and blocking read, in that order.
    ///
    /// If a setting is rejected the channel is closed again before the error is returned.
    pub fn open<B: Backend + ?Sized>(&self, backend: Arc<B>) -> Result<Channel<B>> {
        let mut channel = Channel::open(backend, &self.port, self.mode)?;
        if let Some(speed) = self.speed {
            channel.set_speed(speed)?;
        }
        if let Some(enabled) = self.timestamps {
            channel.set_timestamps(enabled)?;
        }
        if let Some(enabled) = self.blocking_read {
            channel.set_blocking_read(enabled)?;
        }
        debug!("Configured VSCAN channel: {self:?}");
        Ok(channel)
    }
}
