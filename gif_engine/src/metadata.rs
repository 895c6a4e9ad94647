//! GIF block walker
//!
//! Walks the block structure of a GIF without decoding any pixel data and
//! collects everything playback needs up front: canvas size, per-frame
//! delays and disposal, loop count and comment.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};

use crate::errors::{io_error_kind, EngineError, GifError};
use crate::source::{InputSource, OpenedSource};

/// Delay used when a frame declares 0 or 1 centiseconds.
pub const DEFAULT_FRAME_DURATION_MS: u32 = 100;

/// Comment extensions are concatenated up to this many bytes.
pub const COMMENT_LENGTH_MAX: usize = 2048;

const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_SEPARATOR: u8 = 0x2C;
const TRAILER: u8 = 0x3B;
const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
const COMMENT_LABEL: u8 = 0xFE;
const APPLICATION_LABEL: u8 = 0xFF;

/// How a frame is disposed of before the next one is drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposal {
    #[default]
    Unspecified,
    Keep,
    Background,
    Previous,
}

impl Disposal {
    fn from_packed(packed: u8) -> Self {
        match (packed >> 2) & 0x07 {
            1 => Disposal::Keep,
            2 => Disposal::Background,
            3 => Disposal::Previous,
            _ => Disposal::Unspecified,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
    pub duration_ms: u32,
    pub disposal: Disposal,
    pub transparent_index: Option<u8>,
}

/// Everything known about a GIF before decoding pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GifMetadata {
    pub width: u32,
    pub height: u32,
    /// 0 means repeat forever
    pub loop_count: u16,
    pub comment: Option<String>,
    pub frames: Vec<FrameInfo>,
    /// Byte length of the input, `None` when it came from a stream
    pub source_length: Option<u64>,
    pub allocation_byte_count: u64,
    pub metadata_byte_count: u64,
}

impl GifMetadata {
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn duration_ms(&self) -> u64 {
        self.frames.iter().map(|f| f.duration_ms as u64).sum()
    }

    pub fn frame_durations(&self) -> Vec<u32> {
        self.frames.iter().map(|f| f.duration_ms).collect()
    }

    pub fn frame_duration(&self, index: usize) -> Result<u32, EngineError> {
        self.frames
            .get(index)
            .map(|f| f.duration_ms)
            .ok_or(EngineError::IndexOutOfRange { index, count: self.frames.len() })
    }

    /// More than one frame and a non-zero total duration.
    pub fn is_animated(&self) -> bool {
        self.frame_count() > 1 && self.duration_ms() > 0
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(|e| EngineError::InvalidArgument(e.to_string()))
    }
}

impl fmt::Display for GifMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loops = match self.loop_count {
            0 => "Infinity".to_string(),
            n => n.to_string(),
        };
        write!(
            f,
            "{}GIF: size: {}x{}, frames: {}, loops: {}, duration: {}",
            if self.is_animated() { "Animated " } else { "" },
            self.width,
            self.height,
            self.frame_count(),
            loops,
            self.duration_ms()
        )
    }
}

/// Byte level cursor over GIF blocks.
struct BlockWalker<R> {
    reader: R,
}

impl<R: Read> BlockWalker<R> {
    fn read_exact<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn byte(&mut self) -> Result<u8, EngineError> {
        self.read_exact::<1>().map(|b| b[0]).map_err(read_error)
    }

    fn skip(&mut self, count: u64) -> Result<(), EngineError> {
        let skipped = io::copy(&mut (&mut self.reader).take(count), &mut io::sink()).map_err(read_error)?;
        if skipped < count {
            return Err(EngineError::decode(GifError::PrematureEof, "input ended inside a block"));
        }
        Ok(())
    }

    /// Next data sub-block, `None` on the block terminator.
    fn sub_block(&mut self) -> Result<Option<Vec<u8>>, EngineError> {
        let size = self.byte()?;
        if size == 0 {
            return Ok(None);
        }
        let mut data = vec![0u8; size as usize];
        self.reader.read_exact(&mut data).map_err(read_error)?;
        Ok(Some(data))
    }

    fn skip_sub_blocks(&mut self) -> Result<(), EngineError> {
        loop {
            let size = self.byte()?;
            if size == 0 {
                return Ok(());
            }
            self.skip(size as u64)?;
        }
    }
}

fn read_error(err: io::Error) -> EngineError {
    EngineError::decode(io_error_kind(&err), err.to_string())
}

#[inline]
fn color_table_len(flags: u8) -> u64 {
    3 * (1u64 << ((flags & 0x07) + 1))
}

#[derive(Clone, Copy, Default)]
struct GraphicControl {
    duration_ms: u32,
    disposal: Disposal,
    transparent_index: Option<u8>,
}

/// Walks all blocks of a GIF and returns its metadata.
///
/// A missing trailer after at least one complete frame is accepted, many
/// encoders in the wild omit it.
pub fn read_metadata<R: Read>(reader: R) -> Result<GifMetadata, EngineError> {
    let mut walker = BlockWalker { reader };

    let signature: [u8; 6] = walker
        .read_exact()
        .map_err(|_| EngineError::decode(GifError::NotGifFormat, "input shorter than GIF signature"))?;
    if &signature != b"GIF89a" && &signature != b"GIF87a" {
        return Err(EngineError::decode(GifError::NotGifFormat, "missing GIF87a/GIF89a signature"));
    }

    let screen: [u8; 7] = walker
        .read_exact()
        .map_err(|e| EngineError::decode(GifError::MissingScreenDescriptor, e.to_string()))?;
    let width = u16::from_le_bytes([screen[0], screen[1]]) as u32;
    let height = u16::from_le_bytes([screen[2], screen[3]]) as u32;
    if width == 0 || height == 0 {
        return Err(EngineError::decode(
            GifError::InvalidScreenDimensions,
            format!("screen is {width}x{height}"),
        ));
    }

    let flags = screen[4];
    if flags & 0x80 != 0 {
        walker.skip(color_table_len(flags))?;
    }

    let mut frames: Vec<FrameInfo> = Vec::new();
    let mut control: Option<GraphicControl> = None;
    let mut loop_count: u16 = 1;
    let mut comment: Vec<u8> = Vec::new();

    loop {
        let introducer = match walker.read_exact::<1>() {
            Ok([b]) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !frames.is_empty() => break,
            Err(e) => return Err(read_error(e)),
        };

        match introducer {
            EXTENSION_INTRODUCER => match walker.byte()? {
                GRAPHIC_CONTROL_LABEL => {
                    let mut parsed = GraphicControl::default();
                    if let Some(data) = walker.sub_block()? {
                        if data.len() >= 4 {
                            let packed = data[0];
                            let delay_cs = u16::from_le_bytes([data[1], data[2]]) as u32;
                            parsed.duration_ms = delay_cs * 10;
                            parsed.disposal = Disposal::from_packed(packed);
                            if packed & 0x01 != 0 {
                                parsed.transparent_index = Some(data[3]);
                            }
                        }
                        walker.skip_sub_blocks()?;
                    }
                    control = Some(parsed);
                }
                COMMENT_LABEL => {
                    while let Some(data) = walker.sub_block()? {
                        if comment.len() < COMMENT_LENGTH_MAX {
                            let room = COMMENT_LENGTH_MAX - comment.len();
                            comment.extend_from_slice(&data[..data.len().min(room)]);
                        }
                    }
                }
                APPLICATION_LABEL => {
                    if let Some(identifier) = walker.sub_block()? {
                        let looping = identifier.starts_with(b"NETSCAPE2.0")
                            || identifier.starts_with(b"ANIMEXTS1.0");
                        while let Some(data) = walker.sub_block()? {
                            if looping && data.len() >= 3 && data[0] == 1 {
                                let repeats = u16::from_le_bytes([data[1], data[2]]);
                                loop_count = if repeats == 0 { 0 } else { repeats.saturating_add(1) };
                            }
                        }
                    }
                }
                _ => walker.skip_sub_blocks()?,
            },
            IMAGE_SEPARATOR => {
                let descriptor: [u8; 9] = walker.read_exact().map_err(|e| {
                    EngineError::decode(GifError::MissingImageDescriptor, e.to_string())
                })?;
                let local_flags = descriptor[8];
                if local_flags & 0x80 != 0 {
                    walker.skip(color_table_len(local_flags))?;
                } else if flags & 0x80 == 0 {
                    return Err(EngineError::decode(
                        GifError::MissingColorMap,
                        format!("frame {} has no color table", frames.len()),
                    ));
                }

                // LZW minimum code size, then the image data
                walker.byte()?;
                walker.skip_sub_blocks()?;

                let gce = control.take().unwrap_or_default();
                let duration_ms = if gce.duration_ms > 10 {
                    gce.duration_ms
                } else {
                    DEFAULT_FRAME_DURATION_MS
                };

                frames.push(FrameInfo {
                    left: u16::from_le_bytes([descriptor[0], descriptor[1]]),
                    top: u16::from_le_bytes([descriptor[2], descriptor[3]]),
                    width: u16::from_le_bytes([descriptor[4], descriptor[5]]),
                    height: u16::from_le_bytes([descriptor[6], descriptor[7]]),
                    duration_ms,
                    disposal: gce.disposal,
                    transparent_index: gce.transparent_index,
                });
            }
            TRAILER => break,
            other => {
                return Err(EngineError::decode(
                    GifError::WrongRecordType,
                    format!("unexpected block introducer 0x{other:02X}"),
                ));
            }
        }
    }

    if frames.is_empty() {
        return Err(EngineError::decode(GifError::NoFrames, "no image descriptor before trailer"));
    }

    let comment = if comment.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&comment).into_owned())
    };

    let canvas_bytes = width as u64 * height as u64 * 4;
    let max_raster = frames
        .iter()
        .map(|f| f.width as u64 * f.height as u64)
        .max()
        .unwrap_or(0);
    let restores_previous = frames.iter().any(|f| f.disposal == Disposal::Previous);
    let allocation_byte_count =
        canvas_bytes + max_raster * 4 + if restores_previous { canvas_bytes } else { 0 };

    let metadata_byte_count = (std::mem::size_of::<GifMetadata>()
        + frames.len() * std::mem::size_of::<FrameInfo>()
        + comment.as_ref().map_or(0, |c| c.len())) as u64;

    Ok(GifMetadata {
        width,
        height,
        loop_count,
        comment,
        frames,
        source_length: None,
        allocation_byte_count,
        metadata_byte_count,
    })
}

/// Opens `source` and reads its metadata without decoding pixels.
pub fn probe(source: impl Into<InputSource>) -> Result<GifMetadata, EngineError> {
    let opened = OpenedSource::open(source.into())?;
    let mut metadata = read_metadata(opened.reader()?)?;
    metadata.source_length = opened.length();
    Ok(metadata)
}

/// Probes many in-memory GIFs in parallel.
pub fn probe_batch(images: &[&[u8]]) -> Vec<Result<GifMetadata, EngineError>> {
    images
        .par_iter()
        .map(|data| {
            let mut metadata = read_metadata(*data)?;
            metadata.source_length = Some(data.len() as u64);
            Ok(metadata)
        })
        .collect()
}

/// Check if data is an animated GIF (more than one frame, non-zero duration)
pub fn is_animated(data: &[u8]) -> bool {
    read_metadata(data).map(|m| m.is_animated()).unwrap_or(false)
}
