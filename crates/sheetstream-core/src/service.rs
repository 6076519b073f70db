//! Writer-side drain service
//!
//! Runs inside the writer process (or a thread in tests): attach to the
//! stream's double buffer, drain each ready slot into the container, and
//! clear the slot to release the engine's backpressure. On a write
//! failure the ready flag stays set and the failure word is raised, so
//! the engine aborts instead of waiting forever.

use std::path::PathBuf;
use std::thread;

use tracing::{debug, error, info};

use crate::buffer::SharedDoubleBuffer;
use crate::codec::{build_codec, ContainerCodec, StackExtents};
use crate::state::{WriterState, POLL_INTERVAL};
use crate::writer::WriterJobSpec;
use crate::{Error, Result};

/// What a finished drain run produced.
#[derive(Debug, Clone)]
pub struct WriterReport {
    pub destination: PathBuf,
    pub chunks_drained: u64,
    pub frames_drained: u64,
    /// False when the engine aborted and the container is marked truncated
    pub complete: bool,
}

/// The consumer side of one stream.
pub struct WriterService {
    buffer: SharedDoubleBuffer,
    codec: Box<dyn ContainerCodec>,
    destination: PathBuf,
}

impl WriterService {
    /// Attach to the stream named in `spec` and build its codec.
    ///
    /// This is the writer-process entry path; geometry and chunk size come
    /// from the control block, not from the spec, so the two sides cannot
    /// disagree.
    pub fn from_spec(spec: WriterJobSpec) -> Result<Self> {
        let buffer = SharedDoubleBuffer::open(&spec.buffer_name)?;
        let codec = build_codec(buffer.shape(), buffer.chunk_size(), spec.tile, spec.codec);
        Ok(Self {
            buffer,
            codec,
            destination: spec.destination,
        })
    }

    /// In-process construction for tests and demos.
    pub fn new(
        buffer: SharedDoubleBuffer,
        codec: Box<dyn ContainerCodec>,
        destination: PathBuf,
    ) -> Self {
        Self {
            buffer,
            codec,
            destination,
        }
    }

    /// Drain until the engine declares the stream done, then finalize.
    pub fn run(mut self) -> Result<WriterReport> {
        self.buffer.control().set_writer_state(WriterState::Running);
        info!(
            stream = self.buffer.name(),
            destination = %self.destination.display(),
            "writer draining"
        );

        if let Err(e) = self.codec.open(&self.destination) {
            self.buffer.control().set_writer_failed(0);
            error!(error = %e, "container open failed");
            return Err(e);
        }

        let mut frames_drained = 0u64;
        let mut chunks_drained = 0u64;
        loop {
            if let Some(ready) = self.buffer.try_acquire_ready() {
                let chunk_index = ready.chunk_index();
                let frame_count = ready.frame_count();
                match self
                    .codec
                    .write_chunk(ready.frames(), frame_count, chunk_index)
                {
                    Ok(()) => {
                        frames_drained += u64::from(frame_count);
                        chunks_drained += 1;
                        ready.complete();
                        debug!(chunk_index, frame_count, "chunk drained");
                    }
                    Err(e) => {
                        // Drop without completing: the slot stays ready so
                        // the engine cannot refill it, and the failure word
                        // tells it why
                        drop(ready);
                        self.buffer.control().set_writer_failed(chunk_index);
                        let _ = self.codec.close();
                        error!(chunk_index, error = %e, "chunk write failed");
                        return Err(Error::WriteFailure {
                            chunk_index,
                            path: self.destination.clone(),
                            cause: e.to_string(),
                        });
                    }
                }
            } else if self.buffer.control().stream_done() {
                break;
            } else {
                thread::sleep(POLL_INTERVAL);
            }
        }

        let complete = !self.buffer.control().stream_aborted();
        let extents = StackExtents {
            frames_total: frames_drained,
            chunks_total: chunks_drained,
            complete,
        };
        let finish = match self.codec.finalize(&extents) {
            Ok(()) => self.codec.close(),
            Err(e) => Err(e),
        };
        if let Err(e) = finish {
            self.buffer.control().set_writer_failed(chunks_drained);
            error!(error = %e, "container finalize failed");
            return Err(e);
        }

        self.buffer.control().set_writer_state(WriterState::Finished);
        info!(
            chunks = chunks_drained,
            frames = frames_drained,
            complete,
            "writer finished"
        );
        Ok(WriterReport {
            destination: self.destination,
            chunks_drained,
            frames_drained,
            complete,
        })
    }
}
