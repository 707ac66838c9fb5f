//! Rendered state of the capture/detect loop.
//!
//! The view is a plain model of what the user currently sees. A [`crate::terminal::Surface`]
//! presents it after every change.
use std::fmt;

use common::{
    data_url,
    protocol::{DetectionResponse, DetectionResult, GalleryEntry, Ripeness},
    stats::RipenessStats,
};

/// Status indicator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Loading,
    Ready,
    Error(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Loading => f.write_str("Loading detection model..."),
            Status::Ready => f.write_str("Ready"),
            Status::Error(msg) => write!(f, "Error: {msg}"),
        }
    }
}

/// Which controls are usable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Controls {
    pub camera_on: bool,
    pub capture: bool,
    pub auto: bool,
    pub auto_running: bool,
}

/// What part of the view changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Status,
    Controls,
    Alert,
    Detection,
    DetectError,
    Upload,
}

/// One line of the detection list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectionRow {
    pub class: String,
    pub ripeness: Ripeness,
    /// Confidence in whole percent.
    pub percent: u32,
}

impl From<&DetectionResult> for DetectionRow {
    fn from(detection: &DetectionResult) -> Self {
        Self {
            class: detection.class.clone(),
            ripeness: detection.ripeness,
            percent: (detection.confidence * 100.0).round().max(0.0) as u32,
        }
    }
}

impl fmt::Display for DetectionRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {} ({}%)", self.class, self.ripeness, self.percent)
    }
}

/// Slice of the ripeness pie chart.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Slice {
    pub ripeness: Ripeness,
    pub count: usize,
    pub share: f32,
}

/// Pie chart of ripeness classes, always with one slice per known class.
#[derive(Debug, PartialEq)]
pub struct PieChart {
    slices: [Slice; 4],
    total: usize,
}

impl PieChart {
    pub fn from_stats(stats: &RipenessStats) -> Self {
        let slices = Ripeness::ALL.map(|ripeness| Slice {
            ripeness,
            count: stats.get(ripeness),
            share: stats.share(ripeness),
        });
        Self {
            slices,
            total: stats.total(),
        }
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn count(&self, ripeness: Ripeness) -> usize {
        self.slices[ripeness.index()].count
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Holds the single chart instance.
///
/// Charts are never updated in place: [`ChartSlot::replace`] disposes the previous chart before
/// installing the new one.
#[derive(Debug, Default)]
pub struct ChartSlot {
    current: Option<PieChart>,
    disposed: usize,
}

impl ChartSlot {
    pub fn replace(&mut self, chart: PieChart) {
        if let Some(previous) = self.current.take() {
            drop(previous);
            self.disposed += 1;
            log::trace!("Disposed chart #{}", self.disposed);
        }
        self.current = Some(chart);
    }

    pub fn current(&self) -> Option<&PieChart> {
        self.current.as_ref()
    }

    /// Number of charts disposed so far.
    pub fn disposed(&self) -> usize {
        self.disposed
    }
}

/// Everything currently shown to the user.
#[derive(Debug)]
pub struct View {
    pub status: Status,
    pub controls: Controls,
    /// Last blocking warning.
    pub alert: Option<String>,
    /// Annotated JPEG of the last detection.
    pub image: Option<Vec<u8>>,
    pub rows: Vec<DetectionRow>,
    pub chart: ChartSlot,
    pub gallery: Vec<GalleryEntry>,
    pub detect_error: Option<String>,
    pub upload_message: Option<String>,
}

impl Default for View {
    fn default() -> Self {
        Self {
            status: Status::Loading,
            controls: Controls::default(),
            alert: None,
            image: None,
            rows: Vec::new(),
            chart: ChartSlot::default(),
            gallery: Vec::new(),
            detect_error: None,
            upload_message: None,
        }
    }
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alert(&mut self, msg: impl Into<String>) {
        self.alert = Some(msg.into());
    }

    /// Render a successful detection.
    ///
    /// The chart always shows the tally of `response.detections`; server-supplied stats are only
    /// checked against it.
    pub fn show_detection(&mut self, response: DetectionResponse) {
        self.detect_error = None;

        self.image = match data_url::decode(&response.image) {
            Ok(decoded) => Some(decoded.data),
            Err(err) => {
                log::warn!("Annotated image not shown: {}", err);
                None
            }
        };

        self.rows = response.detections.iter().map(DetectionRow::from).collect();

        let stats = RipenessStats::from_detections(&response.detections);
        if let Some(server_stats) = response.stats {
            if server_stats != stats {
                log::warn!(
                    "Server stats {:?} disagree with the detections {:?}",
                    server_stats,
                    stats
                );
            }
        }
        self.chart.replace(PieChart::from_stats(&stats));

        if let Some(library) = response.library {
            self.gallery = library;
        }
    }

    /// Replace the results with an error message.
    pub fn show_detect_error(&mut self, msg: impl Into<String>) {
        self.detect_error = Some(msg.into());
        self.image = None;
        self.rows.clear();
    }
}
