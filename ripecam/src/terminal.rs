//! Terminal presentation of the [`View`].
//!
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::view::{Change, Controls, PieChart, View};

/// Width of a full bar in the chart summary.
const BAR_WIDTH: usize = 20;

/// Presents the view after every change.
pub trait Surface {
    fn refresh(&mut self, view: &View, change: Change);
}

/// Prints to stdout and writes annotated images to an output directory.
pub struct TerminalSurface {
    output_dir: Option<PathBuf>,
}

impl TerminalSurface {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self { output_dir }
    }

    fn save_image(&self, dir: &Path, image: &[u8]) {
        let path = dir.join("latest.jpg");
        match fs::create_dir_all(dir).and_then(|_| fs::write(&path, image)) {
            Ok(()) => println!("Annotated image: {}", path.display()),
            Err(err) => log::error!("Failed to write {}: {}", path.display(), err),
        }
    }
}

impl Surface for TerminalSurface {
    fn refresh(&mut self, view: &View, change: Change) {
        match change {
            Change::Status => {
                println!("[status] {}", &view.status);
                println!("{}", render_controls(&view.controls));
            }
            Change::Controls => println!("{}", render_controls(&view.controls)),
            Change::Alert => {
                if let Some(alert) = &view.alert {
                    println!("[!] {alert}");
                }
            }
            Change::Detection => {
                print!("{}", render_detections(view));
                if let (Some(dir), Some(image)) = (&self.output_dir, &view.image) {
                    self.save_image(dir, image);
                }
            }
            Change::DetectError => {
                if let Some(err) = &view.detect_error {
                    println!("[error] {err}");
                }
            }
            Change::Upload => {
                if let Some(msg) = &view.upload_message {
                    println!("[upload] {msg}");
                }
            }
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

pub fn render_controls(controls: &Controls) -> String {
    format!(
        "camera: {} | capture: {} | auto: {}{}",
        if controls.camera_on { "on" } else { "off" },
        on_off(controls.capture),
        on_off(controls.auto),
        if controls.auto_running { " (running)" } else { "" },
    )
}

/// Detection list, chart and gallery of the view.
pub fn render_detections(view: &View) -> String {
    let mut out = String::from("Detections\n");
    if view.rows.is_empty() {
        out.push_str("  (none)\n");
    }
    for row in view.rows.iter() {
        out.push_str(&format!("  {row}\n"));
    }

    if let Some(chart) = view.chart.current() {
        out.push_str(&render_chart(chart));
    }

    if !view.gallery.is_empty() {
        out.push_str(&format!("Gallery ({} entries)\n", view.gallery.len()));
        for entry in view.gallery.iter() {
            out.push_str(&format!(
                "  {} {} {} {}\n",
                &entry.date, &entry.fruit, entry.ripeness, &entry.url
            ));
        }
    }

    out
}

/// Text rendition of the ripeness pie chart, one bar per class.
pub fn render_chart(chart: &PieChart) -> String {
    let mut out = format!("Ripeness ({} total)\n", chart.total());
    for slice in chart.slices() {
        let filled = (slice.share * BAR_WIDTH as f32).round() as usize;
        out.push_str(&format!(
            "  {:<9} {}{} {:>5.1}% ({})\n",
            slice.ripeness.as_str(),
            "#".repeat(filled),
            ".".repeat(BAR_WIDTH - filled.min(BAR_WIDTH)),
            slice.share * 100.0,
            slice.count
        ));
    }
    out
}

#[cfg(test)]
mod test {

    use common::{
        data_url,
        protocol::{DetectionResponse, DetectionResult, Ripeness},
        stats::RipenessStats,
    };

    use super::*;
    use crate::Error;

    #[test]
    fn test_render_chart_lists_all_classes() {
        let stats = RipenessStats::from_detections(&[DetectionResult {
            class: "banana".into(),
            ripeness: Ripeness::Ripen,
            confidence: 0.92,
            bbox: None,
        }]);
        let rendered = render_chart(&PieChart::from_stats(&stats));

        assert!(rendered.contains("RIPEN     #################### 100.0% (1)"));
        assert!(rendered.contains("UNRIPEN   ....................   0.0% (0)"));
        assert!(rendered.contains("OVERRIPE"));
        assert!(rendered.contains("NO-FRUIT"));
    }

    #[test]
    fn test_render_controls() {
        let controls = Controls {
            camera_on: true,
            capture: true,
            auto: true,
            auto_running: true,
        };
        assert_eq!(
            render_controls(&controls),
            "camera: on | capture: enabled | auto: enabled (running)"
        );
        assert_eq!(
            render_controls(&Controls::default()),
            "camera: off | capture: disabled | auto: disabled"
        );
    }

    #[test]
    fn test_detection_writes_latest_image() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let mut view = View::new();
        view.show_detection(DetectionResponse {
            image: data_url::encode_jpeg(b"jpeg bytes"),
            detections: vec![],
            stats: None,
            library: None,
        });

        let mut surface = TerminalSurface::new(Some(dir.path().join("out")));
        surface.refresh(&view, Change::Detection);

        assert_eq!(fs::read(dir.path().join("out/latest.jpg"))?, b"jpeg bytes");
        assert!(render_detections(&view).contains("(none)"));

        Ok(())
    }
}
