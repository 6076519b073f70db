//! Plain TIFF stack backend
//!
//! Multi-page grayscale TIFF, one page per frame. Interoperable with
//! standard viewers, at the cost of no chunk-level compression; the
//! blocked container is the throughput-oriented default.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tiff::encoder::{colortype, TiffEncoder};

use crate::codec::{write_sidecar, ContainerCodec, Sidecar, StackExtents};
use crate::dtype::{DType, FrameShape};
use crate::tile::TileDescriptor;
use crate::{Error, Result};

/// Multi-page TIFF stack.
pub struct TiffStackCodec {
    shape: FrameShape,
    chunk_size: u32,
    tile: TileDescriptor,
    path: PathBuf,
    encoder: Option<TiffEncoder<BufWriter<File>>>,
}

impl TiffStackCodec {
    pub fn new(shape: FrameShape, chunk_size: u32, tile: TileDescriptor) -> Self {
        Self {
            shape,
            chunk_size,
            tile,
            path: PathBuf::new(),
            encoder: None,
        }
    }

    fn write_page(&mut self, frame: &[u8]) -> Result<()> {
        let encoder = self.encoder.as_mut().expect("container not open");
        let (cols, rows) = (self.shape.cols, self.shape.rows);
        match self.shape.dtype {
            DType::UInt8 => encoder
                .write_image::<colortype::Gray8>(cols, rows, frame)
                .map_err(|e| Error::Format(format!("tiff: {e}")))?,
            DType::UInt16 => {
                let samples: Vec<u16> = frame
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();
                encoder
                    .write_image::<colortype::Gray16>(cols, rows, &samples)
                    .map_err(|e| Error::Format(format!("tiff: {e}")))?;
            }
        }
        Ok(())
    }
}

impl ContainerCodec for TiffStackCodec {
    fn open(&mut self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let encoder =
            TiffEncoder::new(BufWriter::new(file)).map_err(|e| Error::Format(format!("tiff: {e}")))?;
        self.path = path.to_path_buf();
        self.encoder = Some(encoder);
        Ok(())
    }

    fn write_chunk(&mut self, frames: &[u8], frame_count: u32, _chunk_index: u64) -> Result<()> {
        let frame_bytes = self.shape.frame_bytes();
        assert_eq!(
            frames.len(),
            frame_count as usize * frame_bytes,
            "payload does not match frame count"
        );
        for frame in frames.chunks_exact(frame_bytes) {
            self.write_page(frame)?;
        }
        Ok(())
    }

    fn finalize(&mut self, extents: &StackExtents) -> Result<()> {
        write_sidecar(
            &self.path,
            &Sidecar {
                tile: self.tile.clone(),
                shape: self.shape,
                chunk_size: self.chunk_size,
                extents: *extents,
            },
        )
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the encoder writes the last IFD and flushes the file
        self.encoder.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_sidecar;

    fn tile() -> TileDescriptor {
        TileDescriptor {
            grid: [1, 0, 0],
            position_um: [0.0; 3],
            frame_count: 3,
            channel_name: "640".into(),
            display_color: [1.0, 0.0, 1.0],
            voxel_size_um: [0.4, 0.4, 1.0],
            camera_id: 0,
        }
    }

    #[test]
    fn test_tiff_stack_pages_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.tiff");
        let shape = FrameShape::new(6, 5, DType::UInt16);
        let frame_bytes = shape.frame_bytes();

        let mut codec = TiffStackCodec::new(shape, 2, tile());
        codec.open(&path).unwrap();
        codec
            .write_chunk(&vec![0x01u8; 2 * frame_bytes], 2, 0)
            .unwrap();
        codec.write_chunk(&vec![0x02u8; frame_bytes], 1, 1).unwrap();
        codec
            .finalize(&StackExtents {
                frames_total: 3,
                chunks_total: 2,
                complete: true,
            })
            .unwrap();
        codec.close().unwrap();

        let mut decoder =
            tiff::decoder::Decoder::new(std::io::BufReader::new(File::open(&path).unwrap()))
                .unwrap();
        let mut pages = 1;
        while decoder.more_images() {
            decoder.next_image().unwrap();
            pages += 1;
        }
        assert_eq!(pages, 3);

        let sidecar = read_sidecar(&path).unwrap();
        assert_eq!(sidecar.extents.frames_total, 3);
        assert_eq!(sidecar.shape, shape);
    }
}
