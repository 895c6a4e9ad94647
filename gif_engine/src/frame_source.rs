//! Frame sources: sequential access to decoded frames

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, Frames, RgbaImage};
use tracing::{debug, trace};

use crate::buffer::FrameBuffer;
use crate::errors::{EngineError, GifError};
use crate::metadata::{read_metadata, GifMetadata};
use crate::options::GifOptions;
use crate::source::{InputSource, OpenedSource};

/// Outcome of rendering one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderedFrame {
    pub index: usize,
    pub duration_ms: u32,
    /// The frame was the last one of the animation
    pub loop_completed: bool,
}

/// Outcome of a seek by time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSeek {
    pub frame: RenderedFrame,
    /// How far into `frame` the requested position lies, in ms
    pub offset_ms: u32,
}

/// Sequential producer of composited frames.
///
/// Sources are confined to the thread that created them, which is why this
/// trait has no `Send` bound.
pub trait FrameSource {
    fn metadata(&self) -> &GifMetadata;

    /// Size of the rendered canvas after subsampling.
    fn canvas_size(&self) -> (u32, u32);

    /// Index of the frame currently in the buffer.
    fn current_index(&self) -> Option<usize>;

    /// Decodes the next frame into `buffer`, wrapping to frame 0 after the
    /// last one.
    fn render_frame(&mut self, buffer: &mut FrameBuffer) -> Result<RenderedFrame, EngineError>;

    /// Decodes forward until frame `index` is in `buffer`. Targets at or
    /// before the current frame have no effect and return `None`.
    fn seek_to_frame(
        &mut self,
        index: usize,
        buffer: &mut FrameBuffer,
    ) -> Result<Option<RenderedFrame>, EngineError>;

    /// Rewinds to before frame 0. Returns false when the input can't be
    /// read again.
    fn reset(&mut self) -> bool;

    /// Bytes held by the decoder, stable for the life of the source.
    fn allocation_byte_count(&self) -> u64 {
        self.metadata().allocation_byte_count
    }

    fn metadata_byte_count(&self) -> u64 {
        self.metadata().metadata_byte_count
    }

    /// Seeks to the frame displayed at `position_ms`. Positions past the
    /// total duration land on the last frame.
    fn seek_to_time(
        &mut self,
        position_ms: u64,
        buffer: &mut FrameBuffer,
    ) -> Result<Option<TimeSeek>, EngineError> {
        let (index, offset_ms) = frame_at_time(&self.metadata().frame_durations(), position_ms);
        Ok(self
            .seek_to_frame(index, buffer)?
            .map(|frame| TimeSeek { frame, offset_ms }))
    }
}

/// Frame index shown at `position_ms` and the offset into that frame.
pub fn frame_at_time(durations: &[u32], position_ms: u64) -> (usize, u32) {
    if durations.is_empty() {
        return (0, 0);
    }

    let mut elapsed: u64 = 0;
    let mut index = 0;
    while index + 1 < durations.len() {
        let next = elapsed + durations[index] as u64;
        if next > position_ms {
            break;
        }
        elapsed = next;
        index += 1;
    }

    let offset = position_ms.saturating_sub(elapsed).min(durations[index] as u64);
    (index, offset as u32)
}

/// Decodes a GIF frame by frame.
pub struct GifStream {
    source: OpenedSource,
    metadata: GifMetadata,
    options: GifOptions,
    canvas: (u32, u32),
    frames: Option<Frames<'static>>,
    next_index: usize,
    current_index: Option<usize>,
}

impl GifStream {
    pub fn open(source: InputSource, options: GifOptions) -> Result<Self, EngineError> {
        let options = options.normalized();
        let opened = OpenedSource::open(source)?;
        let mut metadata = read_metadata(opened.reader()?)?;
        metadata.source_length = opened.length();

        let canvas = options.sampled_size(metadata.width, metadata.height);
        debug!(
            "Opened GIF {}x{} with {} frames, canvas {}x{}",
            metadata.width,
            metadata.height,
            metadata.frame_count(),
            canvas.0,
            canvas.1
        );

        Ok(Self {
            source: opened,
            metadata,
            options,
            canvas,
            frames: None,
            next_index: 0,
            current_index: None,
        })
    }

    fn restart(&mut self) {
        self.frames = None;
        self.next_index = 0;
    }

    /// Decodes the frame at `next_index` without advancing.
    fn decode_next(&mut self) -> Result<RgbaImage, EngineError> {
        if self.frames.is_none() {
            let decoder = GifDecoder::new(self.source.reader()?)?;
            self.frames = Some(decoder.into_frames());
            self.next_index = 0;
        }

        let decoded = match self.frames.as_mut().and_then(|frames| frames.next()) {
            Some(Ok(frame)) => Ok(frame.into_buffer()),
            Some(Err(e)) => Err(EngineError::from(e)),
            None => Err(EngineError::decode(
                GifError::PrematureEof,
                format!("frame data ended before frame {}", self.next_index),
            )),
        };

        if decoded.is_err() {
            self.restart();
        }
        decoded
    }
}

impl FrameSource for GifStream {
    fn metadata(&self) -> &GifMetadata {
        &self.metadata
    }

    fn canvas_size(&self) -> (u32, u32) {
        self.canvas
    }

    fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    fn render_frame(&mut self, buffer: &mut FrameBuffer) -> Result<RenderedFrame, EngineError> {
        let index = self.next_index;
        let image = self.decode_next()?;
        buffer.draw(&image, &self.options);
        self.current_index = Some(index);

        let loop_completed = index + 1 >= self.metadata.frame_count();
        if loop_completed {
            self.restart();
        } else {
            self.next_index = index + 1;
        }

        trace!("Rendered frame {}", index);
        Ok(RenderedFrame {
            index,
            duration_ms: self.metadata.frames[index].duration_ms,
            loop_completed,
        })
    }

    fn seek_to_frame(
        &mut self,
        index: usize,
        buffer: &mut FrameBuffer,
    ) -> Result<Option<RenderedFrame>, EngineError> {
        let count = self.metadata.frame_count();
        if index >= count {
            return Err(EngineError::IndexOutOfRange { index, count });
        }
        if matches!(self.current_index, Some(current) if index <= current) {
            return Ok(None);
        }

        while self.next_index < index {
            self.decode_next()?;
            self.next_index += 1;
        }
        self.render_frame(buffer).map(Some)
    }

    fn reset(&mut self) -> bool {
        match self.source.rewind() {
            Ok(()) => {
                self.restart();
                self.current_index = None;
                true
            }
            Err(e) => {
                debug!("Rewind failed: {}", e);
                false
            }
        }
    }
}
