//! Error types for sheetstream

use std::path::PathBuf;
use thiserror::Error;

/// One destination drive that cannot hold its planned tiles
#[derive(Debug, Clone)]
pub struct DriveShortfall {
    pub mount: PathBuf,
    pub required_gb: f64,
    pub free_gb: f64,
}

impl std::fmt::Display for DriveShortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: required {:.2} GB, free {:.2} GB (short {:.2} GB)",
            self.mount.display(),
            self.required_gb,
            self.free_gb,
            self.required_gb - self.free_gb
        )
    }
}

/// List of short drives, formatted for the storage-capacity error
#[derive(Debug, Clone)]
pub struct Shortfalls(pub Vec<DriveShortfall>);

impl std::fmt::Display for Shortfalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for s in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}", s)?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("allocation of {requested_mb} MB of shared memory failed: {reason}")]
    Allocation { requested_mb: u64, reason: String },

    #[error("geometry mismatch: frame source is {frame_source}, buffer is {buffer}")]
    ConfigurationMismatch { frame_source: String, buffer: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("insufficient storage: {0}")]
    InsufficientStorage(Shortfalls),

    #[error("insufficient memory: required {required_gb:.2} GB, free {free_gb:.2} GB")]
    InsufficientMemory { required_gb: f64, free_gb: f64 },

    #[error(
        "insufficient write throughput on {}: measured {measured_mb_s:.1} MB/s, \
         required {required_mb_s:.1} MB/s",
        .drive.display()
    )]
    InsufficientThroughput {
        drive: PathBuf,
        measured_mb_s: f64,
        required_mb_s: f64,
    },

    #[error("write failure at chunk {chunk_index} for {}: {cause}", .path.display())]
    WriteFailure {
        chunk_index: u64,
        path: PathBuf,
        cause: String,
    },

    #[error("writer process failed: {0}")]
    WriterFailed(String),

    #[error("frame source error: {0}")]
    Source(String),

    #[error("container format error: {0}")]
    Format(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
