//! Safe driver layer for VSCAN CAN-bus adapters.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vscan::{Channel, Frame, Library, Mode, Speed};
//!
//! # fn main() -> vscan::Result<()> {
//! let library = Arc::new(Library::load()?);
//! println!("VSCAN API {}", vscan::api_version(&*library)?);
//!
//! let mut channel = Channel::open(library, "COM3", Mode::Normal)?;
//! channel.set_speed(Speed::Kbps500)?;
//! let sent = channel.write(&[Frame::new(0x123, &[0xAA, 0xBB])?])?;
//! assert_eq!(sent, 1);
//! for frame in channel.read()? {
//!     println!("{:03X} {:02X?}", frame.id(), frame.data());
//! }
//! channel.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! The in-memory [`Loopback`] backend is built with the `loopback` feature
//! (on by default). Depend with `default-features = false` to leave it out.
pub mod backend;
pub mod channel;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod frame;

pub use backend::{Backend, Library};
#[cfg(any(test, feature = "loopback"))]
pub use backend::Loopback;
pub use channel::{Channel, ChannelCloser, READ_CAPACITY};
pub use config::ChannelConfig;
pub use control::{ApiVersion, ErrorFlags, HwParams, Mode, Speed, api_version};
pub use drivers::{CanDriver, VscanDriver};
pub use error::{ErrorCode, Malformed, Result, VscanError, describe};
pub use frame::{Frame, FrameFlags, MAX_PAYLOAD, RawFrame};
