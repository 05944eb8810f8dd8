//! Async adapters over the blocking channel API.
pub mod can_driver;
pub mod vscan;

pub use can_driver::CanDriver;
pub use vscan::VscanDriver;
