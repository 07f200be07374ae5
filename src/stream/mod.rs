//! Notification demultiplexing: stream keys, content mapping, write
//! buffering and the async driver.

mod buffer;
mod demux;
mod driver;
mod key;
pub mod mapping;

pub use demux::{
    BufferMode, Clock, DemuxOptions, MessageIdFactory, StreamDemultiplexer, SystemClock,
    ToolCallRouting, UuidMessageIds,
};
pub use driver::{Detach, DriverError, StreamDriver};
pub use key::{StreamKey, StreamKind};
