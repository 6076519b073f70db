//! Writer process entry point
//!
//! Spawned by the acquisition side with a [`WriterJobSpec`] as JSON on
//! stdin. Attaches to the stream's shared double buffer, drains chunks
//! into the destination container, and exits 0 once the container is
//! finalized. Any failure leaves the failure word set in the control
//! block and exits nonzero.

use std::io::stdin;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sheetstream_core::{WriterJobSpec, WriterService};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let spec: WriterJobSpec = match serde_json::from_reader(stdin().lock()) {
        Ok(spec) => spec,
        Err(e) => {
            error!(error = %e, "invalid job spec on stdin");
            return ExitCode::from(2);
        }
    };

    let service = match WriterService::from_spec(spec) {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "cannot attach to stream");
            return ExitCode::from(3);
        }
    };

    match service.run() {
        Ok(report) => {
            info!(
                destination = %report.destination.display(),
                chunks = report.chunks_drained,
                frames = report.frames_drained,
                complete = report.complete,
                "writer done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "writer failed");
            ExitCode::FAILURE
        }
    }
}
