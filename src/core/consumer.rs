use anyhow::Result;

use crate::sensor::{BodyFrame, ColorFrame, StreamSet};

/// A sink for dispatched frames. Frames are only borrowed for the call.
///
/// An `Err` (or a panic) stops further dispatch to this consumer and is
/// reported through the frame source's error event.
pub trait FrameConsumer: Send {
    fn name(&self) -> &str;

    /// Streams this consumer wants to receive.
    fn streams(&self) -> StreamSet;

    fn on_body_frame(&mut self, _frame: &BodyFrame) -> Result<()> {
        Ok(())
    }

    fn on_color_frame(&mut self, _frame: &ColorFrame) -> Result<()> {
        Ok(())
    }

    /// Called once when the frame source closes.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
