//! Cross-process coordination state
//!
//! One `ControlBlock` lives in its own shared memory region per stream.
//! All fields are atomics so both sides can touch it without a lock; slot
//! contents themselves are never accessed concurrently, ownership of each
//! slot sits with exactly one side at any instant.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::dtype::{DType, FrameShape};
use crate::{Error, Result};

/// Poll interval for both backpressure and drain waits.
///
/// Polling (rather than an OS condition primitive) keeps the protocol
/// portable across the process boundary; the interval is short relative to
/// any realistic frame period.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

const MAGIC: u32 = 0x5353_5452; // "SSTR"
const VERSION: u32 = 1;

/// Slot is drained, the engine may fill it
pub(crate) const SLOT_IDLE: u32 = 0;
/// Slot holds a published chunk, the writer may read it
pub(crate) const SLOT_READY: u32 = 1;

/// Writer lifecycle words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WriterState {
    Idle = 0,
    Running = 1,
    Finished = 2,
    Failed = 3,
}

impl WriterState {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => WriterState::Running,
            2 => WriterState::Finished,
            3 => WriterState::Failed,
            _ => WriterState::Idle,
        }
    }
}

/// Coordination state for one stream, shared between engine and writer
#[repr(C)]
pub struct ControlBlock {
    magic: AtomicU32,
    version: AtomicU32,
    chunk_size: AtomicU32,
    rows: AtomicU32,
    cols: AtomicU32,
    dtype: AtomicU32,
    /// Slot the engine currently fills
    active_index: AtomicU32,
    /// Frames written into the active slot so far
    frames_in_active: AtomicU32,
    /// Per-slot status word (SLOT_IDLE / SLOT_READY)
    slot_status: [AtomicU32; 2],
    /// Frame count published with each ready slot
    slot_frames: [AtomicU32; 2],
    /// Chunk index published with each ready slot
    slot_chunk: [AtomicU64; 2],
    /// Chunks handed to the writer so far
    chunks_handed: AtomicU64,
    /// Chunks the writer has finished draining
    chunks_drained: AtomicU64,
    /// Frames handed to the writer so far
    frames_handed: AtomicU64,
    /// Engine sets this once no further chunk will be published
    stream_done: AtomicU32,
    /// Engine sets this when the run ended in a failure; the writer then
    /// marks the container truncated instead of complete
    stream_aborted: AtomicU32,
    /// Writer lifecycle word
    writer_state: AtomicU32,
    /// Chunk index the writer failed on, valid when writer_state == Failed
    failed_chunk: AtomicU64,
}

impl ControlBlock {
    /// Size of the control block in bytes
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Initialize a freshly created (zeroed) block.
    pub(crate) fn init(&self, chunk_size: u32, shape: FrameShape) {
        self.chunk_size.store(chunk_size, Ordering::SeqCst);
        self.rows.store(shape.rows, Ordering::SeqCst);
        self.cols.store(shape.cols, Ordering::SeqCst);
        self.dtype.store(shape.dtype as u8 as u32, Ordering::SeqCst);
        self.version.store(VERSION, Ordering::SeqCst);
        // Magic last: attaching sides treat it as the "initialized" marker
        self.magic.store(MAGIC, Ordering::SeqCst);
    }

    /// Validate an attached block and read back its geometry.
    pub(crate) fn validate(&self) -> Result<(u32, FrameShape)> {
        if self.magic.load(Ordering::SeqCst) != MAGIC {
            return Err(Error::SharedMemory("invalid control block magic".into()));
        }
        let version = self.version.load(Ordering::SeqCst);
        if version != VERSION {
            return Err(Error::SharedMemory(format!(
                "control block version mismatch: expected {VERSION}, got {version}"
            )));
        }
        let dtype_raw = self.dtype.load(Ordering::SeqCst);
        let dtype = u8::try_from(dtype_raw)
            .ok()
            .and_then(DType::from_u8)
            .ok_or_else(|| Error::SharedMemory(format!("invalid dtype word {dtype_raw}")))?;
        let shape = FrameShape::new(
            self.rows.load(Ordering::SeqCst),
            self.cols.load(Ordering::SeqCst),
            dtype,
        );
        Ok((self.chunk_size.load(Ordering::SeqCst), shape))
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size.load(Ordering::SeqCst)
    }

    pub fn active_index(&self) -> u32 {
        self.active_index.load(Ordering::SeqCst)
    }

    pub fn frames_in_active(&self) -> u32 {
        self.frames_in_active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_frames_in_active(&self, n: u32) {
        self.frames_in_active.store(n, Ordering::SeqCst);
    }

    /// Whether `slot` has been drained and may be refilled.
    pub fn slot_idle(&self, slot: u32) -> bool {
        self.slot_status[slot as usize].load(Ordering::Acquire) == SLOT_IDLE
    }

    /// Publish the active slot to the reader side and swap roles.
    ///
    /// Returns the chunk index just published. The caller must already have
    /// established that the other slot is drained; this is asserted here
    /// because violating it would let the engine overwrite a chunk the
    /// writer is still reading.
    pub(crate) fn publish_and_toggle(&self, frame_count: u32) -> u64 {
        let slot = self.active_index() as usize;
        let other = slot ^ 1;
        assert!(
            self.slot_status[slot].load(Ordering::Acquire) == SLOT_IDLE,
            "publishing a slot that is still owned by the writer"
        );
        assert!(
            self.slot_status[other].load(Ordering::Acquire) == SLOT_IDLE,
            "toggling onto a slot the writer has not drained"
        );

        let chunk_index = self.chunks_handed.load(Ordering::SeqCst);
        self.slot_frames[slot].store(frame_count, Ordering::SeqCst);
        self.slot_chunk[slot].store(chunk_index, Ordering::SeqCst);
        self.chunks_handed.store(chunk_index + 1, Ordering::SeqCst);
        self.frames_handed
            .fetch_add(u64::from(frame_count), Ordering::SeqCst);
        self.active_index.store(other as u32, Ordering::SeqCst);
        self.frames_in_active.store(0, Ordering::SeqCst);
        // Release pairs with the writer's Acquire in ready_slot(): the frame
        // data and the words above are visible before the status flips
        self.slot_status[slot].store(SLOT_READY, Ordering::Release);
        chunk_index
    }

    /// Writer side: the slot currently ready for draining, if any.
    pub(crate) fn ready_slot(&self) -> Option<(u32, u32, u64)> {
        for slot in 0..2u32 {
            if self.slot_status[slot as usize].load(Ordering::Acquire) == SLOT_READY {
                let frames = self.slot_frames[slot as usize].load(Ordering::SeqCst);
                let chunk = self.slot_chunk[slot as usize].load(Ordering::SeqCst);
                return Some((slot, frames, chunk));
            }
        }
        None
    }

    /// Writer side: mark `slot` drained, releasing the engine's backpressure.
    pub(crate) fn mark_drained(&self, slot: u32) {
        self.chunks_drained.fetch_add(1, Ordering::SeqCst);
        // Release pairs with the engine's Acquire in slot_idle()
        self.slot_status[slot as usize].store(SLOT_IDLE, Ordering::Release);
    }

    pub(crate) fn set_stream_done(&self) {
        self.stream_done.store(1, Ordering::SeqCst);
    }

    pub fn stream_done(&self) -> bool {
        self.stream_done.load(Ordering::SeqCst) != 0
    }

    pub(crate) fn set_stream_aborted(&self) {
        self.stream_aborted.store(1, Ordering::SeqCst);
    }

    pub fn stream_aborted(&self) -> bool {
        self.stream_aborted.load(Ordering::SeqCst) != 0
    }

    pub fn writer_state(&self) -> WriterState {
        WriterState::from_u32(self.writer_state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_writer_state(&self, state: WriterState) {
        self.writer_state.store(state as u32, Ordering::SeqCst);
    }

    /// Writer side: record a fatal write failure on `chunk_index`.
    pub(crate) fn set_writer_failed(&self, chunk_index: u64) {
        self.failed_chunk.store(chunk_index, Ordering::SeqCst);
        self.writer_state
            .store(WriterState::Failed as u32, Ordering::SeqCst);
    }

    pub fn failed_chunk(&self) -> u64 {
        self.failed_chunk.load(Ordering::SeqCst)
    }

    pub fn chunks_handed(&self) -> u64 {
        self.chunks_handed.load(Ordering::SeqCst)
    }

    pub fn chunks_drained(&self) -> u64 {
        self.chunks_drained.load(Ordering::SeqCst)
    }

    pub fn frames_handed(&self) -> u64 {
        self.frames_handed.load(Ordering::SeqCst)
    }
}
