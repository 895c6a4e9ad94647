//! Input sources a GIF stream can be opened from

use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{EngineError, GifError};

/// Any seekable byte stream that can be handed to the decode worker.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

pub(crate) trait BufReadSeek: BufRead + Seek {}

impl<T: BufRead + Seek> BufReadSeek for T {}

/// Where the GIF bytes come from.
pub enum InputSource {
    /// File on disk, memory-mapped on open
    Path(PathBuf),
    /// In-memory bytes, shared without copying
    Bytes(Arc<[u8]>),
    /// Already opened file (descriptor) starting at `offset`
    File { file: File, offset: u64 },
    /// Generic seekable stream; rewinds seek back to the position it had on open
    Reader(Box<dyn ReadSeek>),
}

impl InputSource {
    pub fn path(path: impl AsRef<Path>) -> Self {
        InputSource::Path(path.as_ref().to_path_buf())
    }

    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        InputSource::Bytes(bytes.into())
    }

    pub fn file(file: File, offset: u64) -> Self {
        InputSource::File { file, offset }
    }

    pub fn reader(reader: impl ReadSeek + 'static) -> Self {
        InputSource::Reader(Box::new(reader))
    }

    fn describe(&self) -> String {
        match self {
            InputSource::Path(path) => format!("path {}", path.display()),
            InputSource::Bytes(bytes) => format!("{} in-memory bytes", bytes.len()),
            InputSource::File { offset, .. } => format!("file descriptor at offset {offset}"),
            InputSource::Reader(_) => "stream".to_string(),
        }
    }
}

impl From<Vec<u8>> for InputSource {
    fn from(bytes: Vec<u8>) -> Self {
        InputSource::Bytes(bytes.into())
    }
}

impl From<&[u8]> for InputSource {
    fn from(bytes: &[u8]) -> Self {
        InputSource::Bytes(bytes.into())
    }
}

impl From<Arc<[u8]>> for InputSource {
    fn from(bytes: Arc<[u8]>) -> Self {
        InputSource::Bytes(bytes)
    }
}

impl From<PathBuf> for InputSource {
    fn from(path: PathBuf) -> Self {
        InputSource::Path(path)
    }
}

impl From<&Path> for InputSource {
    fn from(path: &Path) -> Self {
        InputSource::path(path)
    }
}

impl std::fmt::Debug for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Byte storage backing a memory source.
#[derive(Clone)]
pub(crate) enum SharedBytes {
    Owned(Arc<[u8]>),
    Mapped { map: Arc<Mmap>, len: usize },
}

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            SharedBytes::Owned(bytes) => bytes,
            SharedBytes::Mapped { map, len } => &map[..*len],
        }
    }
}

/// Stream handle shared between successive decoders of the same input.
#[derive(Clone)]
pub(crate) struct SharedReader {
    inner: Arc<Mutex<Box<dyn ReadSeek>>>,
}

impl Read for SharedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.lock().read(buf)
    }
}

impl Seek for SharedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.lock().seek(pos)
    }
}

pub(crate) enum SourceData {
    Memory(SharedBytes),
    Stream { reader: SharedReader, start: u64 },
}

/// An input that has been opened and can produce fresh readers positioned
/// at the start of the GIF data.
pub(crate) struct OpenedSource {
    data: SourceData,
}

impl OpenedSource {
    pub(crate) fn open(source: InputSource) -> Result<Self, EngineError> {
        let data = match source {
            InputSource::Path(path) => {
                let file = File::open(&path).map_err(|e| {
                    EngineError::decode(GifError::OpenFailed, format!("{}: {}", path.display(), e))
                })?;
                SourceData::Memory(map_file(&file, 0)?)
            }
            InputSource::Bytes(bytes) => SourceData::Memory(SharedBytes::Owned(bytes)),
            InputSource::File { file, offset } => SourceData::Memory(map_file(&file, offset)?),
            InputSource::Reader(mut reader) => {
                let start = reader
                    .stream_position()
                    .map_err(|e| EngineError::decode(GifError::NotReadable, e.to_string()))?;
                SourceData::Stream {
                    reader: SharedReader { inner: Arc::new(Mutex::new(reader)) },
                    start,
                }
            }
        };

        Ok(Self { data })
    }

    /// Byte length of the GIF data, `None` for streams.
    pub(crate) fn length(&self) -> Option<u64> {
        match &self.data {
            SourceData::Memory(bytes) => Some(bytes.as_ref().len() as u64),
            SourceData::Stream { .. } => None,
        }
    }

    /// Returns a buffered reader positioned at the start of the data.
    pub(crate) fn reader(&self) -> Result<Box<dyn BufReadSeek>, EngineError> {
        match &self.data {
            SourceData::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            SourceData::Stream { reader, start } => {
                let mut reader = reader.clone();
                reader
                    .seek(SeekFrom::Start(*start))
                    .map_err(|e| EngineError::decode(GifError::RewindFailed, e.to_string()))?;
                Ok(Box::new(BufReader::new(reader)))
            }
        }
    }

    /// Checks that the input can be read again from the start.
    pub(crate) fn rewind(&self) -> Result<(), EngineError> {
        match &self.data {
            SourceData::Memory(_) => Ok(()),
            SourceData::Stream { reader, start } => {
                let mut reader = reader.clone();
                reader
                    .seek(SeekFrom::Start(*start))
                    .map(|_| ())
                    .map_err(|e| EngineError::decode(GifError::RewindFailed, e.to_string()))
            }
        }
    }
}

fn map_file(file: &File, offset: u64) -> Result<SharedBytes, EngineError> {
    let file_len = file
        .metadata()
        .map_err(|e| EngineError::decode(GifError::OpenFailed, e.to_string()))?
        .len();

    if offset > file_len {
        return Err(EngineError::decode(
            GifError::OpenFailed,
            format!("offset {offset} is past the end of a {file_len} byte file"),
        ));
    }

    let len = (file_len - offset) as usize;
    if len == 0 {
        return Ok(SharedBytes::Owned(Arc::from(Vec::new())));
    }

    // Safety: the mapping is read-only; the caller hands us the file for the
    // lifetime of the stream, same contract as any mmap-backed reader.
    let map = unsafe { MmapOptions::new().offset(offset).len(len).map(file) }
        .map_err(|e| EngineError::decode(GifError::OpenFailed, e.to_string()))?;

    Ok(SharedBytes::Mapped { map: Arc::new(map), len })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bytes_source_length() {
        let opened = OpenedSource::open(InputSource::from(vec![1u8, 2, 3])).unwrap();
        assert_eq!(opened.length(), Some(3));

        let mut data = Vec::new();
        opened.reader().unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn test_file_with_offset() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"junkGIF89a").unwrap();

        let opened = OpenedSource::open(InputSource::file(file, 4)).unwrap();
        assert_eq!(opened.length(), Some(6));

        let mut data = Vec::new();
        opened.reader().unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"GIF89a");
    }

    #[test]
    fn test_offset_past_end_fails() {
        let file = tempfile::tempfile().unwrap();
        let err = OpenedSource::open(InputSource::file(file, 10)).err().unwrap();
        assert_eq!(err.gif_error(), GifError::OpenFailed);
    }

    #[test]
    fn test_missing_path_fails_to_open() {
        let err = OpenedSource::open(InputSource::path("/nonexistent/anim.gif")).err().unwrap();
        assert_eq!(err.gif_error(), GifError::OpenFailed);
    }

    #[test]
    fn test_stream_rewinds_to_start_position() {
        let mut cursor = Cursor::new(b"xxGIF".to_vec());
        cursor.set_position(2);

        let opened = OpenedSource::open(InputSource::reader(cursor)).unwrap();
        assert_eq!(opened.length(), None);

        for _ in 0..2 {
            let mut data = Vec::new();
            opened.reader().unwrap().read_to_end(&mut data).unwrap();
            assert_eq!(data, b"GIF");
        }
        assert!(opened.rewind().is_ok());
    }
}
