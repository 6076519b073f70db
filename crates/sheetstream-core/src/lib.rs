//! sheetstream - cross-process double-buffered frame streaming
//!
//! Moves frames from a live source into chunked, compressed container
//! files through a pair of shared memory slots: the acquisition engine
//! fills one slot while a separate writer process drains the other.

pub mod buffer;
pub mod codec;
pub mod dtype;
pub mod engine;
pub mod error;
pub mod preflight;
pub mod service;
pub mod shm;
pub mod source;
pub mod stack;
pub mod state;
pub mod tiff;
pub mod tile;
pub mod writer;

pub use buffer::{PublishedChunk, ReadySlot, SharedDoubleBuffer};
pub use codec::{CodecKind, CodecOptions, Compression, ContainerCodec, StackExtents};
pub use dtype::{DType, FrameShape};
pub use engine::{AcquisitionEngine, EngineState, StopHandle, StreamProgress};
pub use error::{Error, Result};
pub use service::{WriterReport, WriterService};
pub use source::{FrameSource, SimulatedSource};
pub use state::{ControlBlock, WriterState, POLL_INTERVAL};
pub use tile::{StreamDescriptor, TileDescriptor};
pub use writer::{WriterHandle, WriterJobSpec};
