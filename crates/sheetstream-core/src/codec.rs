//! Container codec seam
//!
//! The writer drains chunks through this four-call contract and stays
//! agnostic to the on-disk format. Backends in-tree: the blocked stack
//! container ([`crate::stack`]) and a plain multi-page TIFF stack
//! ([`crate::tiff`]).

use std::ffi::OsString;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dtype::FrameShape;
use crate::tile::TileDescriptor;
use crate::{Error, Result};

/// Per-chunk compression applied by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None = 0,
    Lz4 = 1,
}

impl Compression {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Compression::None),
            1 => Some(Compression::Lz4),
            _ => None,
        }
    }
}

/// Which backend the writer should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Stack,
    Tiff,
}

impl CodecKind {
    /// Conventional file extension for this backend
    pub fn extension(&self) -> &'static str {
        match self {
            CodecKind::Stack => "ssz",
            CodecKind::Tiff => "tiff",
        }
    }
}

/// Codec selection and tuning, serializable across the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecOptions {
    pub kind: CodecKind,
    pub compression: Compression,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            kind: CodecKind::Stack,
            compression: Compression::Lz4,
        }
    }
}

/// Final extents recorded when a container is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackExtents {
    pub frames_total: u64,
    pub chunks_total: u64,
    /// False when the run was aborted and the container is truncated
    pub complete: bool,
}

/// The contract every container backend satisfies.
///
/// Calls arrive in strict order: `open`, then `write_chunk` once per chunk
/// in ascending `chunk_index`, then `finalize`, then `close`.
pub trait ContainerCodec: Send {
    fn open(&mut self, path: &Path) -> Result<()>;
    fn write_chunk(&mut self, frames: &[u8], frame_count: u32, chunk_index: u64) -> Result<()>;
    fn finalize(&mut self, extents: &StackExtents) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Build the backend selected by `options`.
pub fn build_codec(
    shape: FrameShape,
    chunk_size: u32,
    tile: TileDescriptor,
    options: CodecOptions,
) -> Box<dyn ContainerCodec> {
    match options.kind {
        CodecKind::Stack => Box::new(crate::stack::StackCodec::new(
            shape,
            chunk_size,
            tile,
            options.compression,
        )),
        CodecKind::Tiff => Box::new(crate::tiff::TiffStackCodec::new(shape, chunk_size, tile)),
    }
}

/// Sidecar metadata written next to every finalized container.
///
/// This is what the downstream transfer/verification step reads to learn
/// the tile identity and whether the file is complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    pub tile: TileDescriptor,
    pub shape: FrameShape,
    pub chunk_size: u32,
    pub extents: StackExtents,
}

/// `{container}.json`, next to the container file.
pub fn sidecar_path(container: &Path) -> PathBuf {
    let mut os: OsString = container.as_os_str().to_owned();
    os.push(".json");
    PathBuf::from(os)
}

pub(crate) fn write_sidecar(container: &Path, sidecar: &Sidecar) -> Result<()> {
    let file = File::create(sidecar_path(container))?;
    serde_json::to_writer_pretty(BufWriter::new(file), sidecar)
        .map_err(|e| Error::Format(format!("sidecar: {e}")))
}

/// Read back a sidecar, e.g. to verify a finished tile.
pub fn read_sidecar(container: &Path) -> Result<Sidecar> {
    let file = File::open(sidecar_path(container))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| Error::Format(format!("sidecar: {e}")))
}
