//! Blocked stack container
//!
//! The default destination format: a fixed 64-byte header, then one block
//! per chunk (block header + optionally LZ4-compressed frame payload),
//! appended strictly in chunk order. `finalize` rewrites the header with
//! the true extents and flips the complete flag, so a crashed run leaves a
//! file that is recognizably truncated rather than silently short.
//!
//! Layout, all little-endian:
//!
//! ```text
//! header   magic "SSZ1" | version | rows | cols | dtype | chunk_size |
//!          compression | complete | frames_total u64 | chunks_total u64 |
//!          reserved[16]
//! block    chunk_index u64 | frame_count u32 | payload_len u64 | payload
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};
use tracing::debug;

use crate::codec::{write_sidecar, Compression, ContainerCodec, Sidecar, StackExtents};
use crate::dtype::{DType, FrameShape};
use crate::tile::TileDescriptor;
use crate::{Error, Result};

const MAGIC: [u8; 4] = *b"SSZ1";
const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 64;
const BLOCK_HEADER_SIZE: usize = 8 + 4 + 8;

fn encode_header(
    shape: FrameShape,
    chunk_size: u32,
    compression: Compression,
    extents: &StackExtents,
) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&MAGIC);
    buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
    buf[8..12].copy_from_slice(&shape.rows.to_le_bytes());
    buf[12..16].copy_from_slice(&shape.cols.to_le_bytes());
    buf[16..20].copy_from_slice(&(shape.dtype as u8 as u32).to_le_bytes());
    buf[20..24].copy_from_slice(&chunk_size.to_le_bytes());
    buf[24..28].copy_from_slice(&(compression as u32).to_le_bytes());
    buf[28..32].copy_from_slice(&u32::from(extents.complete).to_le_bytes());
    buf[32..40].copy_from_slice(&extents.frames_total.to_le_bytes());
    buf[40..48].copy_from_slice(&extents.chunks_total.to_le_bytes());
    buf
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

/// Blocked stack container backend.
pub struct StackCodec {
    shape: FrameShape,
    chunk_size: u32,
    tile: TileDescriptor,
    compression: Compression,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    next_chunk: u64,
}

impl StackCodec {
    pub fn new(
        shape: FrameShape,
        chunk_size: u32,
        tile: TileDescriptor,
        compression: Compression,
    ) -> Self {
        Self {
            shape,
            chunk_size,
            tile,
            compression,
            path: PathBuf::new(),
            writer: None,
            next_chunk: 0,
        }
    }

    fn writer(&mut self) -> &mut BufWriter<File> {
        self.writer.as_mut().expect("container not open")
    }
}

impl ContainerCodec for StackCodec {
    fn open(&mut self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let provisional = StackExtents {
            frames_total: 0,
            chunks_total: 0,
            complete: false,
        };
        writer.write_all(&encode_header(
            self.shape,
            self.chunk_size,
            self.compression,
            &provisional,
        ))?;
        self.path = path.to_path_buf();
        self.writer = Some(writer);
        self.next_chunk = 0;
        Ok(())
    }

    fn write_chunk(&mut self, frames: &[u8], frame_count: u32, chunk_index: u64) -> Result<()> {
        assert_eq!(
            chunk_index, self.next_chunk,
            "chunks must arrive in order"
        );
        assert_eq!(
            frames.len(),
            frame_count as usize * self.shape.frame_bytes(),
            "payload does not match frame count"
        );

        let payload;
        let payload_ref: &[u8] = match self.compression {
            Compression::None => frames,
            Compression::Lz4 => {
                payload = compress_prepend_size(frames);
                &payload
            }
        };

        let mut block = [0u8; BLOCK_HEADER_SIZE];
        block[0..8].copy_from_slice(&chunk_index.to_le_bytes());
        block[8..12].copy_from_slice(&frame_count.to_le_bytes());
        block[12..20].copy_from_slice(&(payload_ref.len() as u64).to_le_bytes());
        let writer = self.writer();
        writer.write_all(&block)?;
        writer.write_all(payload_ref)?;
        self.next_chunk = chunk_index + 1;
        debug!(
            chunk_index,
            frame_count,
            payload_bytes = payload_ref.len(),
            "stack block written"
        );
        Ok(())
    }

    fn finalize(&mut self, extents: &StackExtents) -> Result<()> {
        let header = encode_header(self.shape, self.chunk_size, self.compression, extents);
        let writer = self.writer();
        writer.flush()?;
        let file = writer.get_mut();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        file.seek(SeekFrom::End(0))?;
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
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_mut().sync_all()?;
        }
        Ok(())
    }
}

/// Parsed stack header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackHeader {
    pub shape: FrameShape,
    pub chunk_size: u32,
    pub compression: Compression,
    pub complete: bool,
    pub frames_total: u64,
    pub chunks_total: u64,
}

/// One decoded chunk.
#[derive(Debug, Clone)]
pub struct StackChunk {
    pub chunk_index: u64,
    pub frame_count: u32,
    pub frames: Vec<u8>,
}

/// Sequential reader for the blocked container, used by verification
/// tooling and tests.
pub struct StackReader {
    reader: BufReader<File>,
    pub header: StackHeader,
}

impl StackReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        if buf[0..4] != MAGIC {
            return Err(Error::Format("bad stack magic".into()));
        }
        let version = read_u32(&buf, 4);
        if version != VERSION {
            return Err(Error::Format(format!(
                "stack version mismatch: expected {VERSION}, got {version}"
            )));
        }
        let dtype = DType::from_u8(read_u32(&buf, 16) as u8)
            .ok_or_else(|| Error::Format("bad dtype word".into()))?;
        let compression = Compression::from_u32(read_u32(&buf, 24))
            .ok_or_else(|| Error::Format("bad compression word".into()))?;
        let header = StackHeader {
            shape: FrameShape::new(read_u32(&buf, 8), read_u32(&buf, 12), dtype),
            chunk_size: read_u32(&buf, 20),
            compression,
            complete: read_u32(&buf, 28) != 0,
            frames_total: read_u64(&buf, 32),
            chunks_total: read_u64(&buf, 40),
        };
        Ok(Self { reader, header })
    }

    /// Next chunk in file order, or `None` at end of file.
    pub fn next_chunk(&mut self) -> Result<Option<StackChunk>> {
        let mut block = [0u8; BLOCK_HEADER_SIZE];
        match self.reader.read_exact(&mut block) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let chunk_index = read_u64(&block, 0);
        let frame_count = read_u32(&block, 8);
        let payload_len = read_u64(&block, 12) as usize;

        let mut payload = vec![0u8; payload_len];
        self.reader.read_exact(&mut payload)?;
        let frames = match self.header.compression {
            Compression::None => payload,
            Compression::Lz4 => decompress_size_prepended(&payload)
                .map_err(|e| Error::Format(format!("lz4: {e}")))?,
        };
        let expected = frame_count as usize * self.header.shape.frame_bytes();
        if frames.len() != expected {
            return Err(Error::Format(format!(
                "chunk {chunk_index} decodes to {} bytes, expected {expected}",
                frames.len()
            )));
        }
        Ok(Some(StackChunk {
            chunk_index,
            frame_count,
            frames,
        }))
    }

    /// Total frames actually present in the blocks (not the header claim).
    pub fn count_frames(&mut self) -> Result<u64> {
        let mut total = 0u64;
        while let Some(chunk) = self.next_chunk()? {
            total += u64::from(chunk.frame_count);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_sidecar;
    use crate::dtype::DType;

    fn tile() -> TileDescriptor {
        TileDescriptor {
            grid: [0, 0, 0],
            position_um: [0.0; 3],
            frame_count: 5,
            channel_name: "561".into(),
            display_color: [1.0, 0.0, 0.0],
            voxel_size_um: [0.4, 0.4, 1.0],
            camera_id: 0,
        }
    }

    fn roundtrip(compression: Compression) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.ssz");
        let shape = FrameShape::new(8, 8, DType::UInt16);
        let frame_bytes = shape.frame_bytes();

        let mut codec = StackCodec::new(shape, 4, tile(), compression);
        codec.open(&path).unwrap();
        codec
            .write_chunk(&vec![0x11u8; 4 * frame_bytes], 4, 0)
            .unwrap();
        codec
            .write_chunk(&vec![0x22u8; frame_bytes], 1, 1)
            .unwrap();
        codec
            .finalize(&StackExtents {
                frames_total: 5,
                chunks_total: 2,
                complete: true,
            })
            .unwrap();
        codec.close().unwrap();

        let mut reader = StackReader::open(&path).unwrap();
        assert!(reader.header.complete);
        assert_eq!(reader.header.frames_total, 5);
        assert_eq!(reader.header.chunks_total, 2);
        assert_eq!(reader.header.shape, shape);

        let first = reader.next_chunk().unwrap().unwrap();
        assert_eq!(first.chunk_index, 0);
        assert_eq!(first.frame_count, 4);
        assert!(first.frames.iter().all(|&b| b == 0x11));
        let second = reader.next_chunk().unwrap().unwrap();
        assert_eq!(second.frame_count, 1);
        assert!(second.frames.iter().all(|&b| b == 0x22));
        assert!(reader.next_chunk().unwrap().is_none());

        let sidecar = read_sidecar(&path).unwrap();
        assert_eq!(sidecar.extents.frames_total, 5);
        assert!(sidecar.extents.complete);
    }

    #[test]
    fn test_roundtrip_uncompressed() {
        roundtrip(Compression::None);
    }

    #[test]
    fn test_roundtrip_lz4() {
        roundtrip(Compression::Lz4);
    }

    #[test]
    fn test_unfinalized_file_reads_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.ssz");
        let shape = FrameShape::new(8, 8, DType::UInt8);

        let mut codec = StackCodec::new(shape, 4, tile(), Compression::None);
        codec.open(&path).unwrap();
        codec
            .write_chunk(&vec![9u8; 4 * shape.frame_bytes()], 4, 0)
            .unwrap();
        codec.close().unwrap();

        let mut reader = StackReader::open(&path).unwrap();
        assert!(!reader.header.complete);
        assert_eq!(reader.count_frames().unwrap(), 4);
    }

    #[test]
    #[should_panic(expected = "in order")]
    fn test_out_of_order_chunk_panics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.ssz");
        let shape = FrameShape::new(4, 4, DType::UInt8);
        let mut codec = StackCodec::new(shape, 2, tile(), Compression::None);
        codec.open(&path).unwrap();
        codec
            .write_chunk(&vec![0u8; 2 * shape.frame_bytes()], 2, 1)
            .unwrap();
    }
}
