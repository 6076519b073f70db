//! Tile and stream descriptors
//!
//! Typed whole-value configuration handed in from the scan-path planner.
//! The core interprets only `frame_count` and the geometry; position,
//! voxel size and display color pass through into container metadata.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dtype::FrameShape;

/// How long the engine waits on a stalled writer before declaring the
/// stream failed. Generous relative to any healthy drain time.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// One tile as planned by the scan path, one stream each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileDescriptor {
    /// Grid indices used in file names
    pub grid: [u32; 3],
    /// Stage position of the tile origin, micrometers
    pub position_um: [f64; 3],
    /// Frames (z-planes) in this tile
    pub frame_count: u64,
    pub channel_name: String,
    /// Display color, normalized RGB
    pub display_color: [f32; 3],
    /// Voxel size, micrometers
    pub voxel_size_um: [f64; 3],
    pub camera_id: u8,
}

/// Everything the engine needs to run one stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream name, also the shared memory namespace
    pub name: String,
    pub total_frame_count: u64,
    pub chunk_size: u32,
    pub shape: FrameShape,
    /// Backpressure wait bound; a writer silent for this long fails the run
    pub drain_timeout: Duration,
}

impl StreamDescriptor {
    pub fn new(name: impl Into<String>, total_frame_count: u64, chunk_size: u32, shape: FrameShape) -> Self {
        Self {
            name: name.into(),
            total_frame_count,
            chunk_size,
            shape,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Chunk sizes this stream will produce, in order.
    ///
    /// `floor(total/chunk_size)` full chunks, then the remainder if nonzero.
    pub fn chunk_plan(&self) -> Vec<u32> {
        let chunk = u64::from(self.chunk_size);
        let full = self.total_frame_count / chunk;
        let rest = self.total_frame_count % chunk;
        let mut plan = vec![self.chunk_size; full as usize];
        if rest > 0 {
            plan.push(rest as u32);
        }
        plan
    }
}

/// File name for one tile, by the convention the transfer side expects:
/// `{prefix}_x_{x:04}_y_{y:04}_z_{z:04}_ch_{channel}_cam_{camera}.{ext}`.
pub fn tile_file_name(prefix: &str, tile: &TileDescriptor, ext: &str) -> String {
    format!(
        "{prefix}_x_{:04}_y_{:04}_z_{:04}_ch_{}_cam_{}.{ext}",
        tile.grid[0], tile.grid[1], tile.grid[2], tile.channel_name, tile.camera_id
    )
}

/// Full destination path for one tile under `dir`.
pub fn tile_file_path(dir: &Path, prefix: &str, tile: &TileDescriptor, ext: &str) -> std::path::PathBuf {
    dir.join(tile_file_name(prefix, tile, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    fn tile() -> TileDescriptor {
        TileDescriptor {
            grid: [3, 12, 0],
            position_um: [120.0, 480.0, 0.0],
            frame_count: 150,
            channel_name: "488".into(),
            display_color: [0.0, 1.0, 0.0],
            voxel_size_um: [0.406, 0.406, 1.0],
            camera_id: 1,
        }
    }

    #[test]
    fn test_chunk_plan_with_remainder() {
        let d = StreamDescriptor::new("t", 150, 64, FrameShape::new(4, 4, DType::UInt8));
        assert_eq!(d.chunk_plan(), vec![64, 64, 22]);
    }

    #[test]
    fn test_chunk_plan_exact_multiple() {
        let d = StreamDescriptor::new("t", 128, 64, FrameShape::new(4, 4, DType::UInt8));
        assert_eq!(d.chunk_plan(), vec![64, 64]);
    }

    #[test]
    fn test_chunk_plan_single_short_stream() {
        let d = StreamDescriptor::new("t", 10, 64, FrameShape::new(4, 4, DType::UInt8));
        assert_eq!(d.chunk_plan(), vec![10]);
    }

    #[test]
    fn test_tile_file_name_convention() {
        assert_eq!(
            tile_file_name("run7", &tile(), "ssz"),
            "run7_x_0003_y_0012_z_0000_ch_488_cam_1.ssz"
        );
    }
}
