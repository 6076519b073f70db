//! Capacity preflight
//!
//! Advisory gates run once before a run starts: enough disk for the
//! planned tiles, enough memory for every stream's slot pair, and a real
//! timed write to confirm the destination drive can sustain the required
//! rate. None of this touches the per-frame hot path.
//!
//! The comparisons are pure functions over injected numbers; the thin
//! shells below them query `sysinfo` and the filesystem.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use sysinfo::{Disks, MemoryRefreshKind, RefreshKind, System};
use tracing::{info, warn};

use crate::dtype::FrameShape;
use crate::error::{DriveShortfall, Shortfalls};
use crate::tile::TileDescriptor;
use crate::{Error, Result};

const GB: f64 = 1e9;
const MB: f64 = 1e6;

/// Bytes one tile will occupy on disk, uncompressed.
pub fn tile_bytes(shape: FrameShape, frame_count: u64) -> u64 {
    shape.frame_bytes() as u64 * frame_count
}

/// Bytes of resident memory one stream needs: both slots at once.
pub fn stream_buffer_bytes(shape: FrameShape, chunk_size: u32) -> u64 {
    2 * shape.chunk_bytes(chunk_size) as u64
}

/// Sustained rate the pipeline must hold, in MB/s.
pub fn required_throughput_mb_s(shape: FrameShape, frame_rate_hz: f64) -> f64 {
    shape.frame_bytes() as f64 * frame_rate_hz / MB
}

/// Required versus free bytes for one destination drive.
#[derive(Debug, Clone)]
pub struct DriveUsage {
    pub mount: PathBuf,
    pub required_bytes: u64,
    pub free_bytes: u64,
}

/// Each drive's own requirement against its own free space.
pub fn check_drive_usage(usages: &[DriveUsage]) -> Result<()> {
    let short: Vec<DriveShortfall> = usages
        .iter()
        .filter(|u| u.required_bytes > u.free_bytes)
        .map(|u| DriveShortfall {
            mount: u.mount.clone(),
            required_gb: u.required_bytes as f64 / GB,
            free_gb: u.free_bytes as f64 / GB,
        })
        .collect();
    if short.is_empty() {
        Ok(())
    } else {
        Err(Error::InsufficientStorage(Shortfalls(short)))
    }
}

/// Buffer-pair memory demand against free system memory.
pub fn check_memory(required_bytes: u64, free_bytes: u64) -> Result<()> {
    if required_bytes > free_bytes {
        Err(Error::InsufficientMemory {
            required_gb: required_bytes as f64 / GB,
            free_gb: free_bytes as f64 / GB,
        })
    } else {
        Ok(())
    }
}

fn mount_of<'a>(disks: &'a Disks, path: &Path) -> Option<(&'a Path, u64)> {
    // Longest mount point that is a prefix of the destination
    disks
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| (d.mount_point(), d.available_space()))
}

/// Sum every planned tile per destination drive and compare against that
/// drive's free space. Returns the grand total in GB when everything fits.
pub fn estimate_required_storage_gb(
    shape: FrameShape,
    plans: &[(PathBuf, TileDescriptor)],
) -> Result<f64> {
    let disks = Disks::new_with_refreshed_list();
    let mut usages: Vec<DriveUsage> = Vec::new();
    let mut total_bytes = 0u64;

    for (dest, tile) in plans {
        let bytes = tile_bytes(shape, tile.frame_count);
        total_bytes += bytes;
        let (mount, free) = match mount_of(&disks, dest) {
            Some(m) => m,
            None => {
                warn!(dest = %dest.display(), "no mounted drive found for destination, skipping storage check");
                continue;
            }
        };
        match usages.iter_mut().find(|u| u.mount == mount) {
            Some(u) => u.required_bytes += bytes,
            None => usages.push(DriveUsage {
                mount: mount.to_path_buf(),
                required_bytes: bytes,
                free_bytes: free,
            }),
        }
    }

    check_drive_usage(&usages)?;
    let total_gb = total_bytes as f64 / GB;
    info!(total_gb, drives = usages.len(), "storage preflight passed");
    Ok(total_gb)
}

/// Slot-pair memory for `stream_count` concurrent streams against free
/// system memory. Returns the requirement in GB when it fits.
pub fn estimate_required_memory_gb(
    shape: FrameShape,
    chunk_size: u32,
    stream_count: u32,
) -> Result<f64> {
    let required = stream_buffer_bytes(shape, chunk_size) * u64::from(stream_count);
    let mut system = System::new();
    system.refresh_specifics(RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()));
    let free = system.available_memory();
    check_memory(required, free)?;
    let required_gb = required as f64 / GB;
    info!(
        required_gb,
        free_gb = free as f64 / GB,
        stream_count,
        "memory preflight passed"
    );
    Ok(required_gb)
}

/// Timed write of `test_size` bytes in `block_size` blocks to `drive`,
/// fsynced, then deleted. Returns the measured rate in MB/s.
pub fn probe_write_speed_mb_s(drive: &Path, test_size: usize, block_size: usize) -> Result<f64> {
    let path = drive.join(format!(".sheetstream_probe_{}", std::process::id()));
    let block = vec![0xA5u8; block_size.max(1)];

    let result = (|| -> Result<f64> {
        let mut file = fs::File::create(&path)?;
        let started = Instant::now();
        let mut written = 0usize;
        while written < test_size {
            let n = block.len().min(test_size - written);
            file.write_all(&block[..n])?;
            written += n;
        }
        file.sync_all()?;
        let secs = started.elapsed().as_secs_f64();
        Ok(written as f64 / MB / secs.max(1e-9))
    })();

    let _ = fs::remove_file(&path);
    result
}

/// Probe the drive and compare against the pipeline's required rate.
///
/// The probe is advisory: if it cannot run at all, this logs a warning and
/// returns `Ok(None)`. A probe that runs but measures below `required_mb_s`
/// is a hard refusal.
pub fn check_throughput(
    drive: &Path,
    required_mb_s: f64,
    test_size: usize,
    block_size: usize,
) -> Result<Option<f64>> {
    let measured = match probe_write_speed_mb_s(drive, test_size, block_size) {
        Ok(rate) => rate,
        Err(e) => {
            warn!(drive = %drive.display(), error = %e, "write-speed probe unavailable, skipping throughput check");
            return Ok(None);
        }
    };
    if measured < required_mb_s {
        return Err(Error::InsufficientThroughput {
            drive: drive.to_path_buf(),
            measured_mb_s: measured,
            required_mb_s,
        });
    }
    info!(
        drive = %drive.display(),
        measured_mb_s = measured,
        required_mb_s,
        "throughput preflight passed"
    );
    Ok(Some(measured))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn test_memory_gate_refuses_two_large_streams() {
        // 2048x2048 u16, chunk 64, two streams: 2 * 2048*2048*64*2 * 2 bytes
        let shape = FrameShape::new(2048, 2048, DType::UInt16);
        let required = stream_buffer_bytes(shape, 64) * 2;
        assert_eq!(required, 2 * 2048 * 2048 * 64 * 2 * 2);

        let err = check_memory(required, 1_500_000_000).unwrap_err();
        match err {
            Error::InsufficientMemory { required_gb, free_gb } => {
                assert!((required_gb - 2.147).abs() < 0.01);
                assert!((free_gb - 1.5).abs() < 1e-9);
            }
            other => panic!("unexpected error: {other}"),
        }

        check_memory(required, 3_000_000_000).unwrap();
    }

    #[test]
    fn test_storage_gate_names_the_short_drive() {
        let usages = [
            DriveUsage {
                mount: PathBuf::from("/mnt/fast"),
                required_bytes: 500_000_000_000,
                free_bytes: 400_000_000_000,
            },
            DriveUsage {
                mount: PathBuf::from("/mnt/slow"),
                required_bytes: 10_000_000_000,
                free_bytes: 100_000_000_000,
            },
        ];
        let err = check_drive_usage(&usages).unwrap_err();
        match err {
            Error::InsufficientStorage(short) => {
                assert_eq!(short.0.len(), 1);
                assert_eq!(short.0[0].mount, PathBuf::from("/mnt/fast"));
                assert!(err_contains(&Error::InsufficientStorage(short), "/mnt/fast"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_each_drive_checked_against_its_own_free_space() {
        // The tight drive passes on its own numbers even though another
        // drive carries a far larger requirement
        let usages = [
            DriveUsage {
                mount: PathBuf::from("/mnt/big"),
                required_bytes: 900,
                free_bytes: 1000,
            },
            DriveUsage {
                mount: PathBuf::from("/mnt/tight"),
                required_bytes: 10,
                free_bytes: 20,
            },
        ];
        check_drive_usage(&usages).unwrap();
    }

    #[test]
    fn test_required_throughput() {
        let shape = FrameShape::new(2048, 2048, DType::UInt16);
        // 8.39 MB frames at 100 Hz
        let rate = required_throughput_mb_s(shape, 100.0);
        assert!((rate - 838.8608).abs() < 1e-3);
    }

    #[test]
    fn test_probe_measures_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let rate = probe_write_speed_mb_s(dir.path(), 1 << 20, 64 << 10).unwrap();
        assert!(rate > 0.0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_throughput_gate_degrades_when_probe_cannot_run() {
        let missing = Path::new("/nonexistent/sheetstream");
        let outcome = check_throughput(missing, 100.0, 1 << 20, 64 << 10).unwrap();
        assert!(outcome.is_none());
    }

    fn err_contains(err: &Error, needle: &str) -> bool {
        err.to_string().contains(needle)
    }
}
