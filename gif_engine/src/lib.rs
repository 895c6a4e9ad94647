//! GIF Engine - Animated GIF playback
//!
//! A Rust-based GIF playback engine with:
//! - Streaming frame decoding from files, memory or seekable streams
//! - Per-handle render worker with self-scheduling frame ticks
//! - Loop counting, speed control, seeking and saved playback state
//! - Parallel metadata probing with Rayon

mod buffer;
mod errors;
mod frame_source;
mod handle;
mod metadata;
mod options;
mod playback;
mod saved_state;
mod scheduler;
mod source;

#[cfg(test)]
mod test_support;

pub use buffer::FrameBuffer;
pub use errors::{EngineError, GifError};
pub use frame_source::{frame_at_time, FrameSource, GifStream, RenderedFrame, TimeSeek};
pub use handle::{GifHandle, HandleBuilder, PlaybackEvent};
pub use metadata::{
    is_animated, probe, probe_batch, read_metadata, Disposal, FrameInfo, GifMetadata,
    COMMENT_LENGTH_MAX, DEFAULT_FRAME_DURATION_MS,
};
pub use options::GifOptions;
pub use playback::{FrameAdvance, PlaybackState, PlaybackStatus, MIN_SPEED};
pub use saved_state::SavedState;
pub use scheduler::{Reschedule, Scheduler, TaskHandler};
pub use source::{InputSource, ReadSeek};
