//! Capture one frame, detect and print the result.
//!
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use env_logger::TimestampPrecision;
use ripecam::{
    client::DetectService,
    config::{CameraArgs, ServiceArgs},
    sensors::{CameraOpener, CameraSession},
    session::detect_frame,
    terminal::{render_detections, Surface, TerminalSurface},
    view::{Change, View},
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    #[clap(flatten)]
    service: ServiceArgs,

    #[clap(flatten)]
    camera: CameraArgs,

    /// Detect on this image instead of capturing from the camera
    #[clap(long)]
    image: Option<PathBuf>,

    /// Directory the annotated image is written to
    #[clap(long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let service = args.service.connect()?;

    let ready = service
        .ready()
        .await
        .with_context(|| format!("Detection service at {} unreachable", &args.service.server))?;
    if !ready.ready {
        bail!(
            "Detection model not ready: {}",
            ready.error.unwrap_or_else(|| "no reason given".to_owned())
        );
    }

    let frame = match &args.image {
        Some(path) => Bytes::from(
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => {
            let mut camera = CameraSession::new(
                args.camera
                    .opener()
                    .open()
                    .with_context(|| format!("Failed to open {}", &args.camera.device))?,
            );
            let frame = camera.capture().context("Failed to capture frame")?;
            camera.release();
            frame
        }
    };

    let response = detect_frame(&service, frame).await.context("Detect failed")?;

    let mut view = View::new();
    view.show_detection(response);

    match &args.output_dir {
        Some(dir) => TerminalSurface::new(Some(dir.clone())).refresh(&view, Change::Detection),
        None => print!("{}", render_detections(&view)),
    }

    Ok(())
}
