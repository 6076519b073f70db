//! Engine-side writer process handle
//!
//! The writer runs as its own OS process so CPU-bound compression and any
//! codec fault stay out of the acquisition context. This module owns the
//! child's lifecycle: configure, spawn with the job spec on stdin, wait
//! out a clean stop, or kill on abort.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec::CodecOptions;
use crate::state::POLL_INTERVAL;
use crate::tile::TileDescriptor;
use crate::{Error, Result};

/// Everything the writer process needs, serialized onto its stdin.
///
/// Geometry and chunk size are deliberately absent: the writer reads them
/// from the control block after attaching, so the two sides cannot drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterJobSpec {
    pub buffer_name: String,
    pub destination: PathBuf,
    pub tile: TileDescriptor,
    pub codec: CodecOptions,
}

/// Binary name of the writer process.
pub const WRITER_EXE: &str = "sheetstream-writer";

fn default_writer_exe() -> PathBuf {
    // Prefer the sibling of the current executable (cargo puts workspace
    // binaries next to each other), fall back to PATH lookup
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(WRITER_EXE);
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from(WRITER_EXE)
}

/// Handle for one writer process, owned by the acquisition side.
#[derive(Debug)]
pub struct WriterHandle {
    spec: WriterJobSpec,
    child: Option<Child>,
    stopped: bool,
}

impl WriterHandle {
    /// Validate the destination and store the job configuration.
    ///
    /// Must succeed before [`WriterHandle::start`]; an unwritable
    /// destination directory is a configuration error, caught here rather
    /// than mid-run.
    pub fn configure(
        buffer_name: impl Into<String>,
        destination: PathBuf,
        tile: TileDescriptor,
        codec: CodecOptions,
    ) -> Result<Self> {
        let dir = destination.parent().filter(|p| !p.as_os_str().is_empty());
        let dir = dir.unwrap_or_else(|| Path::new("."));
        if !dir.is_dir() {
            return Err(Error::Configuration(format!(
                "destination directory {} does not exist",
                dir.display()
            )));
        }
        let probe = dir.join(format!(".sheetstream_writable_{}", std::process::id()));
        fs::write(&probe, b"").map_err(|e| {
            Error::Configuration(format!(
                "destination directory {} is not writable: {e}",
                dir.display()
            ))
        })?;
        let _ = fs::remove_file(&probe);

        Ok(Self {
            spec: WriterJobSpec {
                buffer_name: buffer_name.into(),
                destination,
                tile,
                codec,
            },
            child: None,
            stopped: false,
        })
    }

    pub fn job_spec(&self) -> &WriterJobSpec {
        &self.spec
    }

    /// Spawn the writer binary found next to the current executable.
    pub fn start(&mut self) -> Result<()> {
        let exe = default_writer_exe();
        self.start_with(&exe)
    }

    /// Spawn a specific writer binary.
    pub fn start_with(&mut self, exe: &Path) -> Result<()> {
        if self.child.is_some() {
            return Err(Error::Configuration("writer already started".into()));
        }
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Configuration(format!("spawn {}: {e}", exe.display())))?;

        let stdin = child.stdin.take().expect("stdin was piped");
        serde_json::to_writer(stdin, &self.spec)
            .map_err(|e| Error::Configuration(format!("send job spec: {e}")))?;
        // stdin closes here; the child has its whole job description

        info!(
            pid = child.id(),
            stream = %self.spec.buffer_name,
            destination = %self.spec.destination.display(),
            "writer process started"
        );
        self.child = Some(child);
        Ok(())
    }

    /// Whether the child is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Wait for the writer to drain its outstanding chunk, finalize the
    /// container and exit. Safe to call again after a clean stop.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        let Some(child) = self.child.as_mut() else {
            self.stopped = true;
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() > deadline {
                        warn!(pid = child.id(), "writer did not exit in time, killing");
                        let _ = child.kill();
                        let _ = child.wait();
                        self.stopped = true;
                        return Err(Error::WriterFailed(format!(
                            "writer did not exit within {timeout:?}"
                        )));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    self.stopped = true;
                    return Err(Error::WriterFailed(format!("wait on writer: {e}")));
                }
            }
        };

        self.stopped = true;
        if status.success() {
            info!(stream = %self.spec.buffer_name, "writer process finished");
            Ok(())
        } else {
            Err(Error::WriterFailed(format!(
                "writer exited with {status} for {}",
                self.spec.destination.display()
            )))
        }
    }

    /// Kill the writer. Used when the acquisition side hits a fatal error
    /// and the container is already a loss.
    pub fn abort(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!(pid = child.id(), "aborting writer process");
            let _ = child.kill();
            let _ = child.wait();
        }
        self.stopped = true;
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        if !self.stopped && self.child.is_some() {
            warn!("writer handle dropped while child running");
            self.abort();
        }
    }
}
