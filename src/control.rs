//! Out-of-band control: operating modes, bus speeds and driver queries.
//!
//! Speed and flag changes are issued immediately. The backend decides what
//! happens to frames already queued when the speed changes; nothing here
//! drains or arbitrates in-flight I/O.
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::backend::constants::*;
use crate::backend::{Backend, Ioctl, NO_HANDLE};
use crate::channel::Channel;
use crate::error::{Result, VscanError};

/// Operating mode requested at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Normal,
    /// Receive only; the adapter never drives the bus.
    ListenOnly,
    /// Transmitted frames are also delivered to this channel's receive queue.
    SelfReception,
}

impl Mode {
    pub fn raw(self) -> u32 {
        match self {
            Mode::Normal => VSCAN_MODE_NORMAL,
            Mode::ListenOnly => VSCAN_MODE_LISTEN_ONLY,
            Mode::SelfReception => VSCAN_MODE_SELF_RECEPTION,
        }
    }
}

impl FromStr for Mode {
    type Err = VscanError;

    fn from_str(s: &str) -> Result<Mode> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "normal" => Ok(Mode::Normal),
            "listen-only" | "listen" => Ok(Mode::ListenOnly),
            "self-reception" | "self" | "loopback" => Ok(Mode::SelfReception),
            other => Err(VscanError::InvalidArgument(format!(
                "unknown mode {other:?}"
            ))),
        }
    }
}

/// Bus speed tiers supported by `VSCAN_IOCTL_SET_SPEED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Speed {
    #[serde(rename = "20k")]
    Kbps20,
    #[serde(rename = "50k")]
    Kbps50,
    #[serde(rename = "100k")]
    Kbps100,
    #[serde(rename = "125k")]
    Kbps125,
    #[serde(rename = "250k")]
    Kbps250,
    #[serde(rename = "500k")]
    Kbps500,
    #[serde(rename = "800k")]
    Kbps800,
    #[serde(rename = "1M")]
    Mbps1,
}

impl Speed {
    pub const ALL: [Speed; 8] = [
        Speed::Kbps20,
        Speed::Kbps50,
        Speed::Kbps100,
        Speed::Kbps125,
        Speed::Kbps250,
        Speed::Kbps500,
        Speed::Kbps800,
        Speed::Mbps1,
    ];

    /// Value passed to the backend.
    pub fn raw(self) -> u32 {
        match self {
            Speed::Kbps20 => VSCAN_SPEED_20K,
            Speed::Kbps50 => VSCAN_SPEED_50K,
            Speed::Kbps100 => VSCAN_SPEED_100K,
            Speed::Kbps125 => VSCAN_SPEED_125K,
            Speed::Kbps250 => VSCAN_SPEED_250K,
            Speed::Kbps500 => VSCAN_SPEED_500K,
            Speed::Kbps800 => VSCAN_SPEED_800K,
            Speed::Mbps1 => VSCAN_SPEED_1M,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Speed> {
        Speed::ALL.into_iter().find(|s| s.raw() == raw)
    }

    /// Bits per second.
    pub fn bitrate(self) -> u32 {
        match self {
            Speed::Kbps20 => 20_000,
            Speed::Kbps50 => 50_000,
            Speed::Kbps100 => 100_000,
            Speed::Kbps125 => 125_000,
            Speed::Kbps250 => 250_000,
            Speed::Kbps500 => 500_000,
            Speed::Kbps800 => 800_000,
            Speed::Mbps1 => 1_000_000,
        }
    }

    pub fn from_bitrate(bps: u32) -> Option<Speed> {
        Speed::ALL.into_iter().find(|s| s.bitrate() == bps)
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bitrate() {
            1_000_000 => write!(f, "1M"),
            bps => write!(f, "{}k", bps / 1000),
        }
    }
}

impl FromStr for Speed {
    type Err = VscanError;

    /// Accepts `500k`, `1M` or a plain bit rate such as `500000`.
    fn from_str(s: &str) -> Result<Speed> {
        let t = s.trim().to_ascii_lowercase();
        let bps = if let Some(k) = t.strip_suffix('k') {
            k.parse::<u32>().ok().and_then(|k| k.checked_mul(1_000))
        } else if let Some(m) = t.strip_suffix('m') {
            m.parse::<u32>().ok().and_then(|m| m.checked_mul(1_000_000))
        } else {
            t.parse::<u32>().ok()
        };
        bps.and_then(Speed::from_bitrate).ok_or_else(|| {
            VscanError::InvalidArgument(format!("unsupported CAN bitrate: {s}"))
        })
    }
}

/// Version of the installed vendor API (`VSCAN_API_VERSION`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ApiVersion {
    pub major: u8,
    pub minor: u8,
    pub subminor: u8,
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.subminor)
    }
}

/// Adapter identity (`VSCAN_HWPARAM`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HwParams {
    pub serial_nr: u32,
    pub hw_version: u8,
    pub sw_version: u8,
    pub hw_type: u8,
}

bitflags! {
    /// Controller status reported by `VSCAN_IOCTL_GET_FLAGS`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
    pub struct ErrorFlags: u32 {
        const RX_FIFO_FULL = VSCAN_IOCTL_FLAG_RX_FIFO_FULL;
        const TX_FIFO_FULL = VSCAN_IOCTL_FLAG_TX_FIFO_FULL;
        const ERR_WARNING = VSCAN_IOCTL_FLAG_ERR_WARNING;
        const DATA_OVERRUN = VSCAN_IOCTL_FLAG_DATA_OVERRUN;
        const ERR_PASSIVE = VSCAN_IOCTL_FLAG_ERR_PASSIVE;
        const ARBIT_LOST = VSCAN_IOCTL_FLAG_ARBIT_LOST;
        const BUS_ERROR = VSCAN_IOCTL_FLAG_BUS_ERROR;
    }
}

/// Query the installed driver's API version. No channel needs to be open.
pub fn api_version<B: Backend + ?Sized>(backend: &B) -> Result<ApiVersion> {
    let mut version = ApiVersion::default();
    backend.ioctl(NO_HANDLE, Ioctl::GetApiVersion(&mut version))?;
    debug!("VSCAN API version {version}");
    Ok(version)
}

impl<B: Backend + ?Sized> Channel<B> {
    /// Set the bus speed.
    ///
    /// Frames already queued in either direction are not drained first; how
    /// they are affected is up to the adapter.
    pub fn set_speed(&mut self, speed: Speed) -> Result<()> {
        let handle = self.live_handle("set speed")?;
        self.backend().ioctl(handle, Ioctl::SetSpeed(speed))?;
        debug!("{}: speed set to {speed}", self.port());
        Ok(())
    }

    /// Enable or disable device timestamps on received frames.
    pub fn set_timestamps(&mut self, enabled: bool) -> Result<()> {
        let handle = self.live_handle("set timestamps")?;
        self.backend().ioctl(handle, Ioctl::SetTimestamp(enabled))?;
        debug!("{}: timestamps {}", self.port(), on_off(enabled));
        Ok(())
    }

    /// When enabled, [`Channel::read`] blocks until at least one frame arrives.
    pub fn set_blocking_read(&mut self, enabled: bool) -> Result<()> {
        let handle = self.live_handle("set blocking read")?;
        self.backend().ioctl(handle, Ioctl::SetBlockingRead(enabled))?;
        debug!("{}: blocking read {}", self.port(), on_off(enabled));
        Ok(())
    }

    pub fn hw_params(&self) -> Result<HwParams> {
        let handle = self.live_handle("query hardware parameters")?;
        let mut params = HwParams::default();
        self.backend().ioctl(handle, Ioctl::GetHwParams(&mut params))?;
        Ok(params)
    }

    /// Read the controller status flags. Unknown bits are kept.
    pub fn error_flags(&self) -> Result<ErrorFlags> {
        let handle = self.live_handle("query error flags")?;
        let mut raw = 0u32;
        self.backend().ioctl(handle, Ioctl::GetFlags(&mut raw))?;
        Ok(ErrorFlags::from_bits_retain(raw))
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}
