//! Capacity preflight report
//!
//! Sizes a hypothetical 2-camera acquisition and runs the storage, memory
//! and write-speed gates against the local machine.
//!
//! ```bash
//! cargo run --example preflight
//! ```

use std::path::PathBuf;

use sheetstream_core::preflight::{
    check_throughput, estimate_required_memory_gb, estimate_required_storage_gb,
    required_throughput_mb_s,
};
use sheetstream_core::{DType, FrameShape, TileDescriptor};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let shape = FrameShape::new(2048, 2048, DType::UInt16);
    let chunk_size = 64u32;
    let dest = std::env::temp_dir();

    // A small 2x2 grid of tiles, 500 frames each
    let plans: Vec<(PathBuf, TileDescriptor)> = (0..4u32)
        .map(|i| {
            (
                dest.clone(),
                TileDescriptor {
                    grid: [i % 2, i / 2, 0],
                    position_um: [f64::from(i % 2) * 750.0, f64::from(i / 2) * 750.0, 0.0],
                    frame_count: 500,
                    channel_name: "488".into(),
                    display_color: [0.0, 1.0, 0.0],
                    voxel_size_um: [0.406, 0.406, 1.0],
                    camera_id: 0,
                },
            )
        })
        .collect();

    match estimate_required_storage_gb(shape, &plans) {
        Ok(gb) => println!("storage:    ok, {gb:.2} GB required"),
        Err(e) => println!("storage:    REFUSED - {e}"),
    }

    match estimate_required_memory_gb(shape, chunk_size, 2) {
        Ok(gb) => println!("memory:     ok, {gb:.2} GB for both slot pairs"),
        Err(e) => println!("memory:     REFUSED - {e}"),
    }

    let required = required_throughput_mb_s(shape, 20.0);
    match check_throughput(&dest, required, 64 << 20, 4 << 20)? {
        Some(measured) => println!("throughput: ok, {measured:.0} MB/s measured ({required:.0} MB/s required)"),
        None => println!("throughput: probe unavailable, check skipped"),
    }

    Ok(())
}
