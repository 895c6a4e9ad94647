//! Decoding options

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Options applied while decoding frames.
///
/// `sample_size` is a subsampling factor: 2 halves both dimensions, values
/// outside `1..=65535` fall back to 1. With `opaque` set every pixel is
/// rendered with full alpha.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GifOptions {
    pub sample_size: u16,
    pub opaque: bool,
}

impl Default for GifOptions {
    fn default() -> Self {
        Self { sample_size: 1, opaque: false }
    }
}

impl GifOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_size(mut self, sample_size: u32) -> Self {
        self.sample_size = match sample_size {
            1..=65535 => sample_size as u16,
            _ => 1,
        };
        self
    }

    pub fn with_opaque(mut self, opaque: bool) -> Self {
        self.opaque = opaque;
        self
    }

    /// Parses options from a JSON object, missing keys take defaults.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let options: GifOptions =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        Ok(options.normalized())
    }

    pub(crate) fn normalized(self) -> Self {
        if self.sample_size == 0 {
            Self { sample_size: 1, ..self }
        } else {
            self
        }
    }

    /// Canvas size after subsampling, never smaller than 1x1.
    pub fn sampled_size(&self, width: u32, height: u32) -> (u32, u32) {
        let sample = self.normalized().sample_size as u32;
        ((width / sample).max(1), (height / sample).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_size_range() {
        assert_eq!(GifOptions::new().with_sample_size(0).sample_size, 1);
        assert_eq!(GifOptions::new().with_sample_size(70_000).sample_size, 1);
        assert_eq!(GifOptions::new().with_sample_size(4).sample_size, 4);
    }

    #[test]
    fn test_sampled_size() {
        let options = GifOptions::new().with_sample_size(2);
        assert_eq!(options.sampled_size(10, 7), (5, 3));
        assert_eq!(options.sampled_size(1, 1), (1, 1));
    }

    #[test]
    fn test_from_json() {
        let options = GifOptions::from_json(r#"{"sample_size": 3}"#).unwrap();
        assert_eq!(options, GifOptions { sample_size: 3, opaque: false });

        let options = GifOptions::from_json(r#"{"sample_size": 0, "opaque": true}"#).unwrap();
        assert_eq!(options, GifOptions { sample_size: 1, opaque: true });

        assert!(GifOptions::from_json("[1, 2]").is_err());
    }
}
