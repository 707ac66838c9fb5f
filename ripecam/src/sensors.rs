//! Sensors module.
//!
//! Frame sources deliver encoded images (JPEG or PNG). A [`CameraSession`] exclusively owns one
//! source while the camera is powered on and stops it when the camera is powered off.
use std::{
    fs,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use image::{Rgb, RgbImage};
use thiserror::Error;

use crate::snapshot::{encode_jpeg, SNAPSHOT_HEIGHT, SNAPSHOT_WIDTH};

/// Encoded image as delivered by a frame source.
pub type Frame = Bytes;

/// Errors of frame sources.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("camera I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("camera device error: {0}")]
    Device(String),

    #[error("no image files found in {0}")]
    NoFrames(PathBuf),

    #[error("cannot open {0:?}, built without the `v4l2` feature")]
    Unsupported(String),

    #[error("frame source already stopped")]
    Stopped,

    #[error("failed to generate frame: {0}")]
    Image(#[from] image::ImageError),
}

/// Source of camera frames.
pub trait FrameSource: Send {
    /// Capture the current frame.
    fn capture(&mut self) -> Result<Frame, SensorError>;

    /// Stop the source and release the underlying device. Idempotent.
    fn stop(&mut self);

    /// Human-readable name of the source.
    fn describe(&self) -> String;
}

/// Opens frame sources whenever the camera is powered on.
pub trait CameraOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, SensorError>;
}

/// Capture settings for video devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    /// FourCC pixel format, e.g. `MJPG`.
    pub format: String,
    /// Resolution, the maximum supported one if `None`.
    pub resolution: Option<(u32, u32)>,
    /// Frame interval as `(numerator, denominator)`, the fastest supported one if `None`.
    pub frame_rate: Option<(u32, u32)>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            format: "MJPG".to_owned(),
            resolution: None,
            frame_rate: None,
        }
    }
}

/// Which kind of source a device string refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Video device node, e.g. `/dev/video0`.
    Device(String),
    /// Directory of still images, cycled in name order.
    Directory(PathBuf),
    /// A single still image, repeated.
    File(PathBuf),
    /// Generated frames, no hardware needed.
    Synthetic,
}

impl SourceSpec {
    /// Parse a device string.
    ///
    /// `stub://` selects generated frames, `dir:<path>` a directory of images, `/dev/...` a video
    /// device. Other strings are paths to a directory or a single image.
    pub fn parse(spec: &str) -> Self {
        if spec.starts_with("stub://") {
            SourceSpec::Synthetic
        } else if let Some(dir) = spec.strip_prefix("dir:") {
            SourceSpec::Directory(PathBuf::from(dir))
        } else if spec.starts_with("/dev/") {
            SourceSpec::Device(spec.to_owned())
        } else if Path::new(spec).is_dir() {
            SourceSpec::Directory(PathBuf::from(spec))
        } else {
            SourceSpec::File(PathBuf::from(spec))
        }
    }
}

/// Opens the source described by a [`SourceSpec`].
#[derive(Clone, Debug)]
pub struct SourceOpener {
    spec: SourceSpec,
    device: DeviceConfig,
}

impl SourceOpener {
    pub fn new(spec: SourceSpec, device: DeviceConfig) -> Self {
        Self { spec, device }
    }
}

impl CameraOpener for SourceOpener {
    fn open(&self) -> Result<Box<dyn FrameSource>, SensorError> {
        let source: Box<dyn FrameSource> = match &self.spec {
            SourceSpec::Synthetic => Box::new(SyntheticSource::new()),
            SourceSpec::Directory(dir) => Box::new(StillImageSource::from_dir(dir)?),
            SourceSpec::File(path) => Box::new(StillImageSource::from_file(path)?),
            SourceSpec::Device(device) => open_device(device, &self.device)?,
        };
        log::info!("Using camera {}", source.describe());

        Ok(source)
    }
}

#[cfg(feature = "v4l2")]
fn open_device(device: &str, config: &DeviceConfig) -> Result<Box<dyn FrameSource>, SensorError> {
    Ok(Box::new(v4l2::V4l2Source::open(device, config)?))
}

#[cfg(not(feature = "v4l2"))]
fn open_device(device: &str, _config: &DeviceConfig) -> Result<Box<dyn FrameSource>, SensorError> {
    Err(SensorError::Unsupported(device.to_owned()))
}

/// Live camera, exclusively owning its frame source.
///
/// The source is stopped on [`CameraSession::release`] or, failing that, on drop.
pub struct CameraSession {
    source: Box<dyn FrameSource>,
    released: bool,
}

impl CameraSession {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            released: false,
        }
    }

    pub fn capture(&mut self) -> Result<Frame, SensorError> {
        self.source.capture()
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Stop the source.
    pub fn release(mut self) {
        self.stop_source();
    }

    fn stop_source(&mut self) {
        if !self.released {
            log::info!("Stopping camera {}", self.source.describe());
            self.source.stop();
            self.released = true;
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop_source();
    }
}

/// Cycles through still images.
pub struct StillImageSource {
    name: String,
    frames: Vec<PathBuf>,
    next: usize,
    stopped: bool,
}

impl StillImageSource {
    /// Use every `.jpg`, `.jpeg` and `.png` file of a directory, in name order.
    pub fn from_dir(dir: &Path) -> Result<Self, SensorError> {
        let mut frames: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(SensorError::NoFrames(dir.to_owned()));
        }
        log::debug!("Found {} images in {}", frames.len(), dir.display());

        Ok(Self {
            name: format!("dir:{}", dir.display()),
            frames,
            next: 0,
            stopped: false,
        })
    }

    /// Repeat a single image.
    pub fn from_file(path: &Path) -> Result<Self, SensorError> {
        // Fail on power-on rather than on the first capture
        fs::metadata(path)?;

        Ok(Self {
            name: path.display().to_string(),
            frames: vec![path.to_owned()],
            next: 0,
            stopped: false,
        })
    }
}

impl FrameSource for StillImageSource {
    fn capture(&mut self) -> Result<Frame, SensorError> {
        if self.stopped {
            return Err(SensorError::Stopped);
        }
        let path = &self.frames[self.next];
        self.next = (self.next + 1) % self.frames.len();
        log::debug!("Reading frame {}", path.display());

        Ok(Bytes::from(fs::read(path)?))
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

/// Generated moving gradient frames.
#[derive(Default)]
pub struct SyntheticSource {
    counter: u32,
    stopped: bool,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for SyntheticSource {
    fn capture(&mut self) -> Result<Frame, SensorError> {
        if self.stopped {
            return Err(SensorError::Stopped);
        }
        let shift = self.counter.wrapping_mul(8);
        self.counter = self.counter.wrapping_add(1);

        let frame = RgbImage::from_fn(SNAPSHOT_WIDTH, SNAPSHOT_HEIGHT, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                (shift % 256) as u8,
            ])
        });

        Ok(Bytes::from(encode_jpeg(&frame)?))
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn describe(&self) -> String {
        "stub://synthetic".to_owned()
    }
}

#[cfg(feature = "v4l2")]
mod v4l2 {
    use bytes::Bytes;
    use rscam::{Camera, Config};

    use super::{DeviceConfig, Frame, FrameSource, SensorError};

    /// Video device on a Linux machine.
    pub struct V4l2Source {
        name: String,
        cam: Option<Camera>,
    }

    impl V4l2Source {
        pub fn open(device_name: &str, config: &DeviceConfig) -> Result<Self, SensorError> {
            let mut cam = Camera::new(device_name)?;
            log_supported_formats(&cam, &config.format);
            let format = config.format.as_bytes();

            let resolution = config
                .resolution
                .map(Ok)
                .unwrap_or_else(|| get_max_resolution(&cam, format))?;

            let frame_rate = config
                .frame_rate
                .map(Ok)
                .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

            log::debug!(
                "Starting {} at {:?} with interval {:?}",
                device_name,
                resolution,
                frame_rate
            );
            cam.start(&Config {
                interval: frame_rate,
                resolution,
                format,
                ..Default::default()
            })
            .map_err(|err| SensorError::Device(err.to_string()))?;

            Ok(Self {
                name: device_name.to_owned(),
                cam: Some(cam),
            })
        }
    }

    impl FrameSource for V4l2Source {
        fn capture(&mut self) -> Result<Frame, SensorError> {
            let cam = self.cam.as_ref().ok_or(SensorError::Stopped)?;
            let frame = cam.capture()?;
            Ok(Bytes::copy_from_slice(&frame[..]))
        }

        fn stop(&mut self) {
            if let Some(mut cam) = self.cam.take() {
                if let Err(err) = cam.stop() {
                    log::warn!("Error stopping {}: {}", &self.name, err);
                }
            }
        }

        fn describe(&self) -> String {
            self.name.clone()
        }
    }

    /// Get the maximum supported resolution for the given format.
    pub(super) fn get_max_resolution(
        cam: &Camera,
        format: &[u8],
    ) -> Result<(u32, u32), SensorError> {
        let resolution_info = cam.resolutions(format)?;
        log::debug!("Found resolutions: {:?}", &resolution_info);
        match resolution_info {
            rscam::ResolutionInfo::Discretes(resolutions) => resolutions
                .iter()
                // Highest resolution in terms of number of pixels
                .max_by_key(|res| res.0 * res.1)
                .copied(),
            rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
        }
        .ok_or_else(|| SensorError::Device("No resolution found".to_owned()))
    }

    /// Get the maximum supported frame rate for the given format and resolution.
    fn get_max_frame_rate(
        cam: &Camera,
        format: &[u8],
        resolution: (u32, u32),
    ) -> Result<(u32, u32), SensorError> {
        let interval_info = cam.intervals(format, resolution)?;
        log::debug!("Found frame rates: {:?}", &interval_info);
        match interval_info {
            rscam::IntervalInfo::Discretes(frame_rates) => frame_rates
                .iter()
                // Intervals are (numerator, denominator), the fastest has the highest ratio d/n
                .max_by_key(|(n, d)| d / n.max(&1))
                .copied(),
            rscam::IntervalInfo::Stepwise { max, .. } => Some(max),
        }
        .ok_or_else(|| SensorError::Device("No frame rate found".to_owned()))
    }

    fn log_supported_formats(cam: &Camera, format: &str) {
        let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
        log::debug!(
            "Supported formats: {:?}, using format {:?}",
            formats,
            format
        );
    }
}
