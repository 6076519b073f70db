//! Acquisition engine
//!
//! Drives the frame-by-frame loop for one stream: fill the active slot,
//! and at each chunk boundary wait out the backpressure, toggle, and hand
//! the chunk to the writer. The only blocking points are the frame grab
//! (bounded by hardware timing) and the backpressure wait (bounded by
//! writer throughput and the drain timeout).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::buffer::SharedDoubleBuffer;
use crate::source::FrameSource;
use crate::state::{WriterState, POLL_INTERVAL};
use crate::tile::StreamDescriptor;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Prepared,
    Running,
    Stopped,
}

/// Chunk progress for one stream, read from the shared counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamProgress {
    pub frames_handed: u64,
    pub chunks_handed: u64,
    pub chunks_drained: u64,
}

/// Clone-able handle that requests a mid-stream stop from another thread.
#[derive(Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The producer side of one stream.
pub struct AcquisitionEngine<S: FrameSource> {
    buffer: SharedDoubleBuffer,
    source: Option<S>,
    descriptor: Option<StreamDescriptor>,
    state: EngineState,
    stop: StopHandle,
}

impl<S: FrameSource> AcquisitionEngine<S> {
    pub fn new(buffer: SharedDoubleBuffer) -> Self {
        Self {
            buffer,
            source: None,
            descriptor: None,
            state: EngineState::Idle,
            stop: StopHandle::default(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Handle for requesting a stop while `run` is on this thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Validate the source against the buffer and arm the stream.
    pub fn prepare(&mut self, mut source: S, descriptor: StreamDescriptor) -> Result<()> {
        if self.state != EngineState::Idle {
            return Err(Error::Configuration(format!(
                "prepare() in state {:?}",
                self.state
            )));
        }
        if source.shape() != self.buffer.shape() {
            return Err(Error::ConfigurationMismatch {
                frame_source: source.shape().to_string(),
                buffer: self.buffer.shape().to_string(),
            });
        }
        if descriptor.shape != self.buffer.shape() || descriptor.chunk_size != self.buffer.chunk_size()
        {
            return Err(Error::Configuration(format!(
                "stream descriptor ({}, chunk {}) does not match buffer ({}, chunk {})",
                descriptor.shape,
                descriptor.chunk_size,
                self.buffer.shape(),
                self.buffer.chunk_size()
            )));
        }

        source.prepare(descriptor.chunk_size)?;
        self.source = Some(source);
        self.descriptor = Some(descriptor);
        self.state = EngineState::Prepared;
        Ok(())
    }

    /// Run the stream to completion (or until a stop request / failure).
    pub fn run(&mut self) -> Result<StreamProgress> {
        if self.state != EngineState::Prepared {
            return Err(Error::Configuration(format!(
                "run() in state {:?}",
                self.state
            )));
        }
        let descriptor = self.descriptor.clone().expect("prepared without descriptor");
        self.state = EngineState::Running;
        info!(
            stream = %descriptor.name,
            frames = descriptor.total_frame_count,
            chunk_size = descriptor.chunk_size,
            "stream running"
        );

        let result = match self
            .source
            .as_mut()
            .expect("prepared without source")
            .start(descriptor.total_frame_count)
        {
            Ok(()) => self.acquire_loop(&descriptor),
            Err(e) => Err(e),
        };

        // No further chunk will be published, whatever happened above
        if result.is_err() {
            self.buffer.control().set_stream_aborted();
        }
        self.buffer.control().set_stream_done();
        if let Err(e) = self.source.as_mut().expect("prepared without source").stop() {
            warn!(stream = %descriptor.name, error = %e, "frame source stop failed");
        }
        self.state = EngineState::Stopped;

        match result {
            Ok(acquired) => {
                let progress = self.progress();
                info!(
                    stream = %descriptor.name,
                    frames = acquired,
                    chunks = progress.chunks_handed,
                    "stream finished"
                );
                Ok(progress)
            }
            Err(e) => {
                error!(stream = %descriptor.name, error = %e, "stream failed");
                Err(e)
            }
        }
    }

    fn acquire_loop(&mut self, descriptor: &StreamDescriptor) -> Result<u64> {
        let chunk_size = descriptor.chunk_size;
        let mut acquired = 0u64;
        let mut frames_in_chunk = 0u32;

        while acquired < descriptor.total_frame_count {
            if self.stop.is_requested() {
                info!(stream = %descriptor.name, acquired, "stop requested mid-stream");
                break;
            }
            let frame = self
                .source
                .as_mut()
                .expect("prepared without source")
                .grab_frame()?;
            self.buffer.write_frame(frames_in_chunk, frame);
            frames_in_chunk += 1;
            acquired += 1;

            if frames_in_chunk == chunk_size || acquired == descriptor.total_frame_count {
                self.flush_chunk(descriptor)?;
                frames_in_chunk = 0;
            }
        }

        // A stop request can leave a partial chunk in the active slot; it
        // goes to the writer through the same handoff path, never dropped
        if frames_in_chunk > 0 {
            self.flush_chunk(descriptor)?;
        }
        Ok(acquired)
    }

    /// Backpressure wait, then toggle and hand the chunk over.
    fn flush_chunk(&mut self, descriptor: &StreamDescriptor) -> Result<()> {
        self.wait_for_drained(descriptor)?;
        let published = self.buffer.toggle();
        debug!(
            stream = %descriptor.name,
            chunk_index = published.chunk_index,
            frame_count = published.frame_count,
            "chunk handed to writer"
        );
        Ok(())
    }

    /// Poll until the slot about to become active again is drained.
    ///
    /// Bounded by the writer's explicit failure word and by the drain
    /// timeout, so a dead writer fails the run instead of hanging it.
    fn wait_for_drained(&self, descriptor: &StreamDescriptor) -> Result<()> {
        let ctrl = self.buffer.control();
        let target = ctrl.active_index() ^ 1;
        let deadline = Instant::now() + descriptor.drain_timeout;
        loop {
            if ctrl.slot_idle(target) {
                return Ok(());
            }
            if ctrl.writer_state() == WriterState::Failed {
                return Err(Error::WriterFailed(format!(
                    "stream {}: writer reported failure at chunk {}",
                    descriptor.name,
                    ctrl.failed_chunk()
                )));
            }
            if Instant::now() > deadline {
                return Err(Error::WriterFailed(format!(
                    "stream {}: writer made no progress for {:?}",
                    descriptor.name, descriptor.drain_timeout
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Explicit stop. During a run the request is honored at the next
    /// frame boundary; afterwards this is a no-op. Safe to call twice.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            EngineState::Running => {
                self.stop.request_stop();
                Ok(())
            }
            EngineState::Idle | EngineState::Prepared => {
                self.buffer.control().set_stream_done();
                self.state = EngineState::Stopped;
                Ok(())
            }
            EngineState::Stopped => Ok(()),
        }
    }

    pub fn progress(&self) -> StreamProgress {
        let ctrl = self.buffer.control();
        StreamProgress {
            frames_handed: ctrl.frames_handed(),
            chunks_handed: ctrl.chunks_handed(),
            chunks_drained: ctrl.chunks_drained(),
        }
    }

    pub fn buffer(&self) -> &SharedDoubleBuffer {
        &self.buffer
    }

    /// Tear down the stream's shared memory.
    pub fn release(self) {
        self.buffer.release();
    }
}
