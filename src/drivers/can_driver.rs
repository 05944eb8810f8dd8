use async_trait::async_trait;
use std::io;

use crate::frame::Frame;

#[async_trait]
pub trait CanDriver: Send + Sync {
    async fn enable_timestamp(&mut self) -> io::Result<()>;

    async fn set_bitrate(&mut self, bitrate: u32) -> io::Result<()>;

    async fn get_bitrate(&self) -> Option<u32>;

    async fn open_channel(&mut self) -> io::Result<()>;

    /// Send one batch; returns how many frames the adapter accepted.
    async fn send_frames(&mut self, frames: &[Frame]) -> io::Result<usize>;

    async fn send_frame(&mut self, frame: &Frame) -> io::Result<()> {
        match self.send_frames(std::slice::from_ref(frame)).await? {
            0 => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "CAN transmit queue full",
            )),
            _ => Ok(()),
        }
    }

    async fn read_frames(&mut self) -> io::Result<Vec<Frame>>;

    async fn close_channel(&mut self) -> io::Result<()>;
}
