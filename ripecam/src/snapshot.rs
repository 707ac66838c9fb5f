//! Frame snapshots sent to the detection service.
//!
use common::data_url;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ImageError, RgbImage};
use thiserror::Error;

/// Width of every submitted frame.
pub const SNAPSHOT_WIDTH: u32 = 640;
/// Height of every submitted frame.
pub const SNAPSHOT_HEIGHT: u32 = 480;
/// JPEG quality of submitted frames.
pub const JPEG_QUALITY: u8 = 92;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to decode frame: {0}")]
    Decode(#[source] ImageError),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] ImageError),
}

/// Scale a captured frame to exactly 640x480 and encode it as a JPEG data URL.
///
/// The aspect ratio is not preserved.
pub fn snapshot(frame: &[u8]) -> Result<String, SnapshotError> {
    let image = image::load_from_memory(frame).map_err(SnapshotError::Decode)?;
    log::debug!("Snapshot of {}x{} frame", image.width(), image.height());

    let scaled = image
        .resize_exact(SNAPSHOT_WIDTH, SNAPSHOT_HEIGHT, FilterType::Triangle)
        .to_rgb8();
    let jpeg = encode_jpeg(&scaled).map_err(SnapshotError::Encode)?;

    Ok(data_url::encode_jpeg(&jpeg))
}

/// Black 640x480 frame as a JPEG data URL.
pub fn blank_frame() -> Result<String, SnapshotError> {
    let jpeg = encode_jpeg(&RgbImage::new(SNAPSHOT_WIDTH, SNAPSHOT_HEIGHT))
        .map_err(SnapshotError::Encode)?;
    Ok(data_url::encode_jpeg(&jpeg))
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(image)?;
    Ok(buf)
}
