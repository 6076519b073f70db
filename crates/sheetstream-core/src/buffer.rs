//! Cross-process double buffer
//!
//! Two equally sized slot regions plus one control block region, all named
//! after the stream. The engine side allocates and fills; the writer side
//! attaches by name and drains. Ownership of a slot transfers through the
//! status words in the control block, never through a lock.

use tracing::{debug, info};

use crate::dtype::FrameShape;
use crate::shm::SharedRegion;
use crate::state::ControlBlock;
use crate::{Error, Result};

fn ctrl_region_name(name: &str) -> String {
    format!("{name}_ctrl")
}

fn slot_region_name(name: &str, slot: u32) -> String {
    format!("{name}_slot_{slot}")
}

/// One chunk handed to the writer side at a toggle.
///
/// The handoff itself travels through the control block; this is the
/// engine-side record of what was just published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedChunk {
    pub slot: u32,
    pub frame_count: u32,
    pub chunk_index: u64,
}

/// The two shared frame slots and their control block for one stream.
pub struct SharedDoubleBuffer {
    name: String,
    ctrl: SharedRegion,
    slots: [SharedRegion; 2],
    chunk_size: u32,
    shape: FrameShape,
}

// Safety: the regions stay mapped for the lifetime of the struct and all
// coordination state is atomic; moving the handle to another thread is fine.
unsafe impl Send for SharedDoubleBuffer {}

impl SharedDoubleBuffer {
    /// Reserve both slots and the control block for stream `name`.
    ///
    /// Each slot holds `chunk_size` frames of `shape`. Fails with
    /// [`Error::Allocation`] when the OS cannot provide the memory.
    pub fn allocate(name: &str, chunk_size: u32, shape: FrameShape) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Configuration("chunk_size must be nonzero".into()));
        }
        let slot_bytes = shape.chunk_bytes(chunk_size);
        if slot_bytes == 0 {
            return Err(Error::Configuration(format!(
                "degenerate frame shape {shape}"
            )));
        }

        let ctrl = SharedRegion::create(&ctrl_region_name(name), ControlBlock::SIZE)?;
        let slots = [
            SharedRegion::create(&slot_region_name(name, 0), slot_bytes)?,
            SharedRegion::create(&slot_region_name(name, 1), slot_bytes)?,
        ];

        let buffer = Self {
            name: name.to_string(),
            ctrl,
            slots,
            chunk_size,
            shape,
        };
        buffer.control().init(chunk_size, shape);

        info!(
            stream = name,
            chunk_size,
            slot_mb = slot_bytes / (1024 * 1024),
            "allocated double buffer"
        );
        Ok(buffer)
    }

    /// Attach to the double buffer of stream `name`, typically from the
    /// writer process. Validates the control block and slot sizes.
    pub fn open(name: &str) -> Result<Self> {
        let ctrl = SharedRegion::open(&ctrl_region_name(name))?;
        if ctrl.size() < ControlBlock::SIZE {
            return Err(Error::SharedMemory(format!(
                "control region too small: {} < {}",
                ctrl.size(),
                ControlBlock::SIZE
            )));
        }
        // Safety: size checked above; the block is repr(C) atomics
        let block = unsafe { &*(ctrl.as_ptr() as *const ControlBlock) };
        let (chunk_size, shape) = block.validate()?;

        let slots = [
            SharedRegion::open(&slot_region_name(name, 0))?,
            SharedRegion::open(&slot_region_name(name, 1))?,
        ];
        let slot_bytes = shape.chunk_bytes(chunk_size);
        for (i, slot) in slots.iter().enumerate() {
            if slot.size() < slot_bytes {
                return Err(Error::SharedMemory(format!(
                    "slot {i} too small: {} < {slot_bytes}",
                    slot.size()
                )));
            }
        }

        debug!(stream = name, chunk_size, %shape, "attached double buffer");
        Ok(Self {
            name: name.to_string(),
            ctrl,
            slots,
            chunk_size,
            shape,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    /// The shared coordination state.
    pub fn control(&self) -> &ControlBlock {
        // Safety: region is at least ControlBlock::SIZE (checked or created
        // that way) and stays mapped for &self's lifetime
        unsafe { &*(self.ctrl.as_ptr() as *const ControlBlock) }
    }

    /// Copy one frame into the active slot at `index_in_chunk`.
    ///
    /// Preconditions are protocol invariants, not environmental conditions:
    /// violating any of them is a bug in the caller and panics.
    pub fn write_frame(&mut self, index_in_chunk: u32, frame: &[u8]) {
        assert!(
            index_in_chunk < self.chunk_size,
            "frame index {index_in_chunk} past chunk_size {}",
            self.chunk_size
        );
        let frame_bytes = self.shape.frame_bytes();
        assert!(
            frame.len() == frame_bytes,
            "frame is {} bytes, slot expects {frame_bytes}",
            frame.len()
        );
        let active = {
            let ctrl = self.control();
            let active = ctrl.active_index();
            assert!(
                ctrl.slot_idle(active),
                "writing into a slot still owned by the writer"
            );
            active
        };

        let offset = index_in_chunk as usize * frame_bytes;
        let slot = self.slots[active as usize].as_mut_slice();
        slot[offset..offset + frame_bytes].copy_from_slice(frame);
        self.control().set_frames_in_active(index_in_chunk + 1);
    }

    /// Publish the active slot to the writer side and swap roles.
    ///
    /// The caller must have waited (backpressure) until the slot about to
    /// become active is drained; the control block asserts this.
    pub fn toggle(&mut self) -> PublishedChunk {
        let ctrl = self.control();
        let frame_count = ctrl.frames_in_active();
        assert!(frame_count > 0, "toggling an empty slot");
        let slot = ctrl.active_index();
        let chunk_index = ctrl.publish_and_toggle(frame_count);
        debug!(
            stream = %self.name,
            slot,
            frame_count,
            chunk_index,
            "chunk published"
        );
        PublishedChunk {
            slot,
            frame_count,
            chunk_index,
        }
    }

    /// Writer side: take the ready slot, if one is published.
    ///
    /// The returned guard borrows the buffer; the slot stays owned by the
    /// reader until [`ReadySlot::complete`] clears it. Dropping the guard
    /// without completing leaves the slot marked ready, which is the
    /// failure path: the engine sees the stalled flag plus the failure word
    /// instead of a torn slot.
    pub fn try_acquire_ready(&self) -> Option<ReadySlot<'_>> {
        let (slot, frame_count, chunk_index) = self.control().ready_slot()?;
        Some(ReadySlot {
            buffer: self,
            slot,
            frame_count,
            chunk_index,
        })
    }

    /// Unmap both slots and the control block.
    ///
    /// Consumes the handle; outstanding [`ReadySlot`] guards keep it
    /// borrowed, so no reader reference can survive the release.
    pub fn release(self) {
        info!(stream = %self.name, "releasing double buffer");
        drop(self);
    }
}

/// Read-only view of one published chunk, held by the writer while draining.
pub struct ReadySlot<'a> {
    buffer: &'a SharedDoubleBuffer,
    slot: u32,
    frame_count: u32,
    chunk_index: u64,
}

impl ReadySlot<'_> {
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn chunk_index(&self) -> u64 {
        self.chunk_index
    }

    /// Bytes of the `frame_count` frames in this chunk.
    pub fn frames(&self) -> &[u8] {
        let len = self.frame_count as usize * self.buffer.shape.frame_bytes();
        &self.buffer.slots[self.slot as usize].as_slice()[..len]
    }

    /// Mark the chunk drained, releasing the engine's backpressure wait.
    pub fn complete(self) {
        self.buffer.control().mark_drained(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    fn unique_name(tag: &str) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/ss_{tag}_{ts}")
    }

    fn small_shape() -> FrameShape {
        FrameShape::new(4, 4, DType::UInt16)
    }

    #[test]
    fn test_allocate_open_roundtrip() {
        let name = unique_name("buf_rt");
        let engine_side = SharedDoubleBuffer::allocate(&name, 8, small_shape()).unwrap();
        let writer_side = SharedDoubleBuffer::open(&name).unwrap();
        assert_eq!(writer_side.chunk_size(), 8);
        assert_eq!(writer_side.shape(), small_shape());
        drop(writer_side);
        engine_side.release();
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let name = unique_name("buf_zero");
        assert!(matches!(
            SharedDoubleBuffer::allocate(&name, 0, small_shape()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_frames_cross_the_buffer_intact() {
        let name = unique_name("buf_data");
        let mut buffer = SharedDoubleBuffer::allocate(&name, 2, small_shape()).unwrap();
        let reader = SharedDoubleBuffer::open(&name).unwrap();

        let frame_bytes = small_shape().frame_bytes();
        let frame_a = vec![0xAAu8; frame_bytes];
        let frame_b = vec![0x55u8; frame_bytes];
        buffer.write_frame(0, &frame_a);
        buffer.write_frame(1, &frame_b);
        let published = buffer.toggle();
        assert_eq!(published.chunk_index, 0);
        assert_eq!(published.frame_count, 2);

        let ready = reader.try_acquire_ready().unwrap();
        assert_eq!(ready.frame_count(), 2);
        assert_eq!(&ready.frames()[..frame_bytes], &frame_a[..]);
        assert_eq!(&ready.frames()[frame_bytes..], &frame_b[..]);
        ready.complete();

        assert!(reader.try_acquire_ready().is_none());
        assert_eq!(buffer.control().chunks_drained(), 1);
    }

    #[test]
    fn test_partial_chunk_publishes_short_frame_count() {
        let name = unique_name("buf_part");
        let mut buffer = SharedDoubleBuffer::allocate(&name, 8, small_shape()).unwrap();
        let frame = vec![1u8; small_shape().frame_bytes()];
        buffer.write_frame(0, &frame);
        buffer.write_frame(1, &frame);
        buffer.write_frame(2, &frame);
        let published = buffer.toggle();
        assert_eq!(published.frame_count, 3);

        let ready = buffer.try_acquire_ready().unwrap();
        assert_eq!(ready.frames().len(), 3 * small_shape().frame_bytes());
        ready.complete();
    }

    #[test]
    #[should_panic(expected = "past chunk_size")]
    fn test_write_past_chunk_size_panics() {
        let name = unique_name("buf_oob");
        let mut buffer = SharedDoubleBuffer::allocate(&name, 2, small_shape()).unwrap();
        let frame = vec![0u8; small_shape().frame_bytes()];
        buffer.write_frame(2, &frame);
    }

    #[test]
    #[should_panic(expected = "not drained")]
    fn test_toggle_without_drain_panics() {
        let name = unique_name("buf_tear");
        let mut buffer = SharedDoubleBuffer::allocate(&name, 1, small_shape()).unwrap();
        let frame = vec![0u8; small_shape().frame_bytes()];
        buffer.write_frame(0, &frame);
        buffer.toggle();
        buffer.write_frame(0, &frame);
        // Chunk 0 was never drained; publishing chunk 1 would hand the
        // writer both slots at once and must trip the assertion
        buffer.toggle();
    }
}
