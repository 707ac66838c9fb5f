//! Command line options shared by the binaries.
//!
use std::time::Duration;

use clap::Args;

use crate::{
    client::{ClientError, HttpDetectService, ReadinessProbe},
    sensors::{DeviceConfig, SourceOpener, SourceSpec},
};

/// Where and how to reach the detection service.
#[derive(Args, Debug)]
pub struct ServiceArgs {
    /// Base URL of the detection service
    #[clap(long, env = "RIPECAM_SERVER", default_value = "http://127.0.0.1:5000")]
    pub server: String,

    /// Timeout of every request in milliseconds
    #[clap(long, default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// How to find out whether the detection model is loaded
    #[clap(long, value_enum, default_value_t = ReadinessProbe::Endpoint)]
    pub probe: ReadinessProbe,
}

impl ServiceArgs {
    pub fn connect(&self) -> Result<HttpDetectService, ClientError> {
        HttpDetectService::new(
            &self.server,
            Duration::from_millis(self.timeout_ms),
            self.probe,
        )
    }
}

/// Which camera to capture from.
#[derive(Args, Debug)]
pub struct CameraArgs {
    /// Video device, `dir:<path>` of still images, an image file, or `stub://` for generated frames
    #[clap(long, env = "RIPECAM_DEVICE", default_value = "/dev/video0")]
    pub device: String,

    /// Pixel format of video devices
    #[clap(long, default_value = "MJPG")]
    pub format: String,

    /// Resolution of video devices as WIDTHxHEIGHT, the largest supported if omitted
    #[clap(long, value_parser = parse_resolution)]
    pub resolution: Option<(u32, u32)>,

    /// Frame interval of video devices as NUM/DEN, e.g. 1/30, the fastest supported if omitted
    #[clap(long, value_parser = parse_interval)]
    pub interval: Option<(u32, u32)>,
}

impl CameraArgs {
    pub fn opener(&self) -> SourceOpener {
        SourceOpener::new(
            SourceSpec::parse(&self.device),
            DeviceConfig {
                format: self.format.clone(),
                resolution: self.resolution,
                frame_rate: self.interval,
            },
        )
    }
}

fn parse_pair(s: &str, separator: char, what: &str) -> Result<(u32, u32), String> {
    let (a, b) = s
        .split_once(separator)
        .ok_or_else(|| format!("expected {what}"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|err| format!("invalid {what} {s:?}: {err}"))
    };
    match (parse(a)?, parse(b)?) {
        (0, _) | (_, 0) => Err(format!("invalid {what} {s:?}: zero")),
        pair => Ok(pair),
    }
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    parse_pair(s, 'x', "WIDTHxHEIGHT")
}

fn parse_interval(s: &str) -> Result<(u32, u32), String> {
    parse_pair(s, '/', "NUM/DEN")
}
