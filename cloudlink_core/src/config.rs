//! Handler configuration.
//!
//! Both link endpoints must agree on `stream.engine`; everything else only
//! affects the encoding side (the grid-delta stream is self-describing).

use serde::{Deserialize, Serialize};

use crate::error::{CloudError, Result};

/// Scratch buffer size used by the byte-stream codec: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Which generic stream compressor backs `GENERIC_STREAM`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamEngineKind {
    /// zlib-wrapped DEFLATE.
    #[default]
    Deflate,
    Zstd,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub engine: StreamEngineKind,
    /// Engine compression level. 1 is the best-speed profile for both engines.
    pub level: i32,
    pub chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            engine: StreamEngineKind::Deflate,
            level: 1,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    /// Edge length in metres of the quantisation grid.
    pub point_resolution: f64,
    /// Force a key frame every N encoded frames.
    pub keyframe_interval: u32,
    /// Bits kept per colour channel (1..=8).
    pub color_bits: u8,
    /// zstd level of the entropy stage.
    pub entropy_level: i32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            point_resolution: 0.005,
            keyframe_interval: 30,
            color_bits: 8,
            entropy_level: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HandlerConfig {
    pub stream: StreamConfig,
    pub grid: GridConfig,
}

impl HandlerConfig {
    pub fn validate(&self) -> Result<()> {
        let s = &self.stream;
        if s.chunk_size == 0 {
            return Err(CloudError::Config("stream.chunk_size must be > 0".into()));
        }
        let levels = match s.engine {
            StreamEngineKind::Deflate => 0..=9,
            StreamEngineKind::Zstd => 1..=22,
        };
        if !levels.contains(&s.level) {
            return Err(CloudError::Config(format!(
                "stream.level {} out of range {:?} for {:?}",
                s.level, levels, s.engine
            )));
        }

        let g = &self.grid;
        if !(g.point_resolution.is_finite() && g.point_resolution > 0.0) {
            return Err(CloudError::Config(format!(
                "grid.point_resolution must be a positive number, got {}",
                g.point_resolution
            )));
        }
        if g.keyframe_interval == 0 {
            return Err(CloudError::Config("grid.keyframe_interval must be >= 1".into()));
        }
        if !(1..=8).contains(&g.color_bits) {
            return Err(CloudError::Config(format!(
                "grid.color_bits must be in 1..=8, got {}",
                g.color_bits
            )));
        }
        if !(1..=22).contains(&g.entropy_level) {
            return Err(CloudError::Config(format!(
                "grid.entropy_level must be in 1..=22, got {}",
                g.entropy_level
            )));
        }
        Ok(())
    }
}
