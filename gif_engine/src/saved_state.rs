//! Opaque playback snapshot that survives handle teardown

use bytemuck::{Pod, Zeroable};
use std::time::Duration;

use crate::errors::EngineError;

/// Fixed size record stored in a [`SavedState`].
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SavedStateRecord {
    magic: [u8; 4],
    version: u32,
    width: u32,
    height: u32,
    frame_count: u32,
    frame_index: u32,
    current_loop: u32,
    speed: f32,
    remainder_ms: i64,
    reserved: [u8; 24],
}

const MAGIC: [u8; 4] = *b"GIFS";
const VERSION: u32 = 1;
const RECORD_SIZE: usize = std::mem::size_of::<SavedStateRecord>();
const NO_FRAME: u32 = u32::MAX;

/// Position values carried by a saved state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Snapshot {
    pub(crate) frame_index: Option<usize>,
    pub(crate) current_loop: u32,
    pub(crate) speed: f32,
    pub(crate) remainder: Option<Duration>,
}

/// Serialized playback position of an animation.
///
/// Only valid for an animation with the same canvas size and frame count
/// as the one it was taken from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedState(Vec<u8>);

impl SavedState {
    pub(crate) fn capture(canvas: (u32, u32), frame_count: usize, snapshot: Snapshot) -> Self {
        let record = SavedStateRecord {
            magic: MAGIC,
            version: VERSION,
            width: canvas.0,
            height: canvas.1,
            frame_count: frame_count as u32,
            frame_index: snapshot.frame_index.map_or(NO_FRAME, |i| i as u32),
            current_loop: snapshot.current_loop,
            speed: snapshot.speed,
            remainder_ms: snapshot.remainder.map_or(-1, |r| r.as_millis() as i64),
            reserved: [0; 24],
        };
        SavedState(bytemuck::bytes_of(&record).to_vec())
    }

    /// Wraps bytes previously returned by [`SavedState::as_bytes`].
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        SavedState(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Checks the record against the target animation and extracts it.
    pub(crate) fn validate(&self, canvas: (u32, u32), frame_count: usize) -> Result<Snapshot, EngineError> {
        if self.0.len() != RECORD_SIZE {
            return Err(EngineError::InvalidSavedState(format!(
                "expected {} bytes, got {}",
                RECORD_SIZE,
                self.0.len()
            )));
        }

        let record: SavedStateRecord = bytemuck::pod_read_unaligned(&self.0);
        if record.magic != MAGIC {
            return Err(EngineError::InvalidSavedState("bad magic".to_string()));
        }
        if record.version != VERSION {
            return Err(EngineError::InvalidSavedState(format!("unsupported version {}", record.version)));
        }
        if (record.width, record.height) != canvas || record.frame_count as usize != frame_count {
            return Err(EngineError::InvalidSavedState(format!(
                "state is for a {}x{} animation with {} frames",
                record.width, record.height, record.frame_count
            )));
        }

        let frame_index = match record.frame_index {
            NO_FRAME => None,
            index if (index as usize) < frame_count => Some(index as usize),
            index => {
                return Err(EngineError::InvalidSavedState(format!("frame index {index} out of range")));
            }
        };

        if !(record.speed > 0.0) {
            return Err(EngineError::InvalidSavedState(format!("speed {} is not positive", record.speed)));
        }

        Ok(Snapshot {
            frame_index,
            current_loop: record.current_loop,
            speed: record.speed,
            remainder: u64::try_from(record.remainder_ms).ok().map(Duration::from_millis),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            frame_index: Some(1),
            current_loop: 2,
            speed: 1.5,
            remainder: Some(Duration::from_millis(40)),
        }
    }

    #[test]
    fn test_record_size() {
        assert_eq!(RECORD_SIZE, 64);
    }

    #[test]
    fn test_capture_and_validate() {
        let state = SavedState::capture((4, 4), 3, snapshot());
        assert_eq!(state.as_bytes().len(), 64);

        let restored = SavedState::from_bytes(state.as_bytes().to_vec());
        assert_eq!(restored.validate((4, 4), 3).unwrap(), snapshot());
    }

    #[test]
    fn test_no_frame_and_no_remainder() {
        let empty = Snapshot { frame_index: None, current_loop: 0, speed: 1.0, remainder: None };
        let state = SavedState::capture((2, 2), 2, empty);
        assert_eq!(state.validate((2, 2), 2).unwrap(), empty);
    }

    #[test]
    fn test_rejects_other_animation() {
        let state = SavedState::capture((4, 4), 3, snapshot());
        assert!(matches!(state.validate((4, 5), 3), Err(EngineError::InvalidSavedState(_))));
        assert!(matches!(state.validate((4, 4), 2), Err(EngineError::InvalidSavedState(_))));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(SavedState::from_bytes(vec![0u8; 10]).validate((4, 4), 3).is_err());

        let mut bytes = SavedState::capture((4, 4), 3, snapshot()).into_bytes();
        bytes[0] = b'X';
        assert!(SavedState::from_bytes(bytes).validate((4, 4), 3).is_err());
    }
}
