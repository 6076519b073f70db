//! Simulated acquisition run
//!
//! Streams synthetic frames through the double buffer into a blocked
//! container under a temp directory, with the drain service on a thread.
//! For the real two-process topology, see the `sheetstream-writer` binary.
//!
//! ```bash
//! cargo run --example acquire
//! ```

use std::thread;
use std::time::Duration;

use sheetstream_core::codec::build_codec;
use sheetstream_core::stack::StackReader;
use sheetstream_core::tile::tile_file_path;
use sheetstream_core::{
    AcquisitionEngine, CodecOptions, DType, FrameShape, SharedDoubleBuffer, SimulatedSource,
    StreamDescriptor, TileDescriptor, WriterService,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let shape = FrameShape::new(512, 512, DType::UInt16);
    let chunk_size = 32u32;
    let total_frames = 150u64;
    let tile = TileDescriptor {
        grid: [0, 0, 0],
        position_um: [0.0, 0.0, 0.0],
        frame_count: total_frames,
        channel_name: "488".into(),
        display_color: [0.0, 1.0, 0.0],
        voxel_size_um: [0.406, 0.406, 1.0],
        camera_id: 0,
    };

    let dir = tempfile::tempdir()?;
    let destination = tile_file_path(dir.path(), "demo", &tile, "ssz");
    let stream = format!("/ss_demo_{}", std::process::id());

    let buffer = SharedDoubleBuffer::allocate(&stream, chunk_size, shape)?;
    let writer_buffer = SharedDoubleBuffer::open(&stream)?;
    let codec = build_codec(shape, chunk_size, tile, CodecOptions::default());
    let dest = destination.clone();
    let writer = thread::spawn(move || WriterService::new(writer_buffer, codec, dest).run());

    let source = SimulatedSource::new(shape).with_frame_period(Duration::from_millis(2));
    let mut engine = AcquisitionEngine::new(buffer);
    engine.prepare(source, StreamDescriptor::new(&stream, total_frames, chunk_size, shape))?;
    let progress = engine.run()?;
    let report = writer.join().expect("writer thread panicked")?;

    println!(
        "acquired {} frames in {} chunks -> {} ({} chunks drained)",
        progress.frames_handed,
        progress.chunks_handed,
        report.destination.display(),
        report.chunks_drained
    );

    let mut reader = StackReader::open(&destination)?;
    println!(
        "container: complete={} frames={} chunks={}",
        reader.header.complete,
        reader.header.frames_total,
        reader.header.chunks_total
    );
    println!("frames verified on read-back: {}", reader.count_frames()?);

    engine.release();
    Ok(())
}
