//! Sample data types and frame geometry

use serde::{Deserialize, Serialize};

/// Sample types produced by the supported frame sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DType {
    UInt8 = 0,
    UInt16 = 1,
}

impl DType {
    /// Size in bytes of one sample
    pub const fn size(&self) -> usize {
        match self {
            DType::UInt8 => 1,
            DType::UInt16 => 2,
        }
    }

    /// Convert from u8
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DType::UInt8),
            1 => Some(DType::UInt16),
            _ => None,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::UInt8 => write!(f, "u8"),
            DType::UInt16 => write!(f, "u16"),
        }
    }
}

/// Geometry of one captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    pub rows: u32,
    pub cols: u32,
    pub dtype: DType,
}

impl FrameShape {
    pub fn new(rows: u32, cols: u32, dtype: DType) -> Self {
        Self { rows, cols, dtype }
    }

    /// Bytes per frame
    pub const fn frame_bytes(&self) -> usize {
        self.rows as usize * self.cols as usize * self.dtype.size()
    }

    /// Bytes per chunk of `chunk_size` frames
    pub const fn chunk_bytes(&self, chunk_size: u32) -> usize {
        self.frame_bytes() * chunk_size as usize
    }
}

impl std::fmt::Display for FrameShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.rows, self.cols, self.dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_sizes() {
        assert_eq!(DType::UInt8.size(), 1);
        assert_eq!(DType::UInt16.size(), 2);
        assert_eq!(DType::from_u8(1), Some(DType::UInt16));
        assert_eq!(DType::from_u8(7), None);
    }

    #[test]
    fn test_frame_bytes() {
        let shape = FrameShape::new(2048, 2048, DType::UInt16);
        assert_eq!(shape.frame_bytes(), 2048 * 2048 * 2);
        assert_eq!(shape.chunk_bytes(64), 2048 * 2048 * 2 * 64);
    }
}
