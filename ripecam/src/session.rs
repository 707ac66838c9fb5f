//! Capture/detect loop.
//!
//! A [`Session`] owns all state of the loop: readiness of the detection service, the camera, the
//! auto-poll timer and the [`View`]. It runs on a single task and reacts to [`Event`]s. Timers
//! and network requests run in their own tasks and report back through the event channel, so
//! responses of overlapping requests are rendered in the order they arrive.
use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use common::protocol::{DetectionResponse, ReadyResponse};
use thiserror::Error;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::{
    client::{upload_file, ClientError, DetectService},
    sensors::{CameraOpener, CameraSession, Frame, SensorError},
    snapshot::snapshot,
    terminal::Surface,
    view::{Change, Controls, Status, View},
};

/// Period of the auto-poll timer.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// User commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    PowerOn,
    PowerOff,
    Capture,
    AutoStart,
    AutoStop,
    AutoToggle,
    Upload(PathBuf),
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, arg) = line
            .split_once(char::is_whitespace)
            .map(|(word, arg)| (word, arg.trim()))
            .unwrap_or((line, ""));

        match (word, arg) {
            ("on", "") => Ok(Command::PowerOn),
            ("off", "") => Ok(Command::PowerOff),
            ("capture" | "c", "") => Ok(Command::Capture),
            ("auto" | "start", "") => Ok(Command::AutoStart),
            ("stop", "") => Ok(Command::AutoStop),
            ("toggle" | "t", "") => Ok(Command::AutoToggle),
            ("upload", "") => Err("usage: upload <path>".to_owned()),
            ("upload", path) => Ok(Command::Upload(PathBuf::from(path))),
            ("status", "") => Ok(Command::Status),
            ("quit" | "exit" | "q", "") => Ok(Command::Quit),
            _ => Err(format!("unknown command {line:?}")),
        }
    }
}

/// Everything the session reacts to.
#[derive(Debug)]
pub enum Event {
    Command(Command),
    /// Auto-poll timer fired, tagged with the timer's generation.
    Tick(u64),
    ReadyDone(Result<ReadyResponse, ClientError>),
    DetectDone(Result<DetectionResponse, ClientError>),
    UploadDone(Result<String, ClientError>),
}

/// Whether the detection service can be used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    /// Terminal until the program is restarted.
    Failed(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Why a user action was refused.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Detection model not ready")]
    NotReady,

    #[error("Camera is off")]
    CameraOff,

    #[error("Camera error: {0}")]
    Camera(#[from] SensorError),
}

/// Whether to keep processing events.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Active auto-poll timer. Dropping it stops the timer.
struct AutoPoll {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Drop for AutoPoll {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// State of the capture/detect loop.
///
/// Invariant: an active auto-poll implies a powered-on camera, which for capturing implies a
/// ready service.
pub struct Session<S, F> {
    service: Arc<S>,
    opener: Box<dyn CameraOpener>,
    surface: F,
    events: UnboundedSender<Event>,
    interval: Duration,
    readiness: Readiness,
    probe_started: bool,
    camera: Option<CameraSession>,
    auto_poll: Option<AutoPoll>,
    generation: u64,
    in_flight: usize,
    view: View,
}

impl<S, F> Session<S, F>
where
    S: DetectService + 'static,
    F: Surface,
{
    pub fn new(
        service: Arc<S>,
        opener: Box<dyn CameraOpener>,
        surface: F,
        events: UnboundedSender<Event>,
    ) -> Self {
        Self {
            service,
            opener,
            surface,
            events,
            interval: DEFAULT_POLL_INTERVAL,
            readiness: Readiness::Pending,
            probe_started: false,
            camera: None,
            auto_poll: None,
            generation: 0,
            in_flight: 0,
            view: View::new(),
        }
    }

    /// Use a different auto-poll period.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn camera_on(&self) -> bool {
        self.camera.is_some()
    }

    pub fn auto_polling(&self) -> bool {
        self.auto_poll.is_some()
    }

    /// Number of detect requests without a response yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn surface(&self) -> &F {
        &self.surface
    }

    pub fn controls(&self) -> Controls {
        let usable = self.readiness.is_ready() && self.camera.is_some();
        Controls {
            camera_on: self.camera.is_some(),
            capture: usable,
            auto: usable,
            auto_running: self.auto_poll.is_some(),
        }
    }

    /// Process events until a [`Command::Quit`].
    pub async fn run(mut self, mut events: UnboundedReceiver<Event>) {
        self.start();
        while let Some(event) = events.recv().await {
            if self.handle(event) == Flow::Quit {
                break;
            }
        }
        self.shutdown();
    }

    /// Probe readiness of the service. Only the first call has an effect.
    pub fn start(&mut self) {
        if self.probe_started {
            return;
        }
        self.probe_started = true;
        self.view.status = Status::Loading;
        self.refresh(Change::Status);

        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = service.ready().await;
            events.send(Event::ReadyDone(result)).ok();
        });
    }

    pub fn handle(&mut self, event: Event) -> Flow {
        match event {
            Event::Command(command) => return self.handle_command(command),
            Event::Tick(generation) => self.on_tick(generation),
            Event::ReadyDone(result) => self.on_ready(result),
            Event::DetectDone(result) => self.on_detect(result),
            Event::UploadDone(result) => self.on_upload(result),
        }
        Flow::Continue
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        log::debug!("Command {:?}", &command);
        // Refusals are already shown as alerts
        let result = match command {
            Command::PowerOn => self.power_on(),
            Command::PowerOff => {
                self.power_off();
                Ok(())
            }
            Command::Capture => self.capture(),
            Command::AutoStart => self.start_auto(),
            Command::AutoStop => {
                self.stop_auto();
                Ok(())
            }
            Command::AutoToggle => self.toggle_auto(),
            Command::Upload(path) => {
                self.upload(path);
                Ok(())
            }
            Command::Status => {
                self.refresh(Change::Status);
                Ok(())
            }
            Command::Quit => {
                self.shutdown();
                return Flow::Quit;
            }
        };
        if let Err(err) = result {
            log::debug!("Refused: {}", err);
        }
        Flow::Continue
    }

    /// Turn the camera on. A no-op while it is on.
    ///
    /// Allowed while readiness is still pending, refused once the service failed to become ready.
    pub fn power_on(&mut self) -> Result<(), ActionError> {
        if self.camera.is_some() {
            return Ok(());
        }
        if matches!(self.readiness, Readiness::Failed(_)) {
            return Err(self.refuse(ActionError::NotReady));
        }
        match self.opener.open() {
            Ok(source) => {
                self.camera = Some(CameraSession::new(source));
                self.refresh(Change::Controls);
                Ok(())
            }
            Err(err) => {
                log::error!("Failed to open camera: {}", err);
                let err = ActionError::from(err);
                self.view.alert(err.to_string());
                self.refresh(Change::Alert);
                Err(err)
            }
        }
    }

    /// Turn the camera off, stopping auto-poll first.
    pub fn power_off(&mut self) {
        self.auto_poll = None;
        if let Some(camera) = self.camera.take() {
            camera.release();
        }
        self.refresh(Change::Controls);
    }

    /// Capture one frame and submit it.
    pub fn capture(&mut self) -> Result<(), ActionError> {
        self.ensure_capture_allowed()?;
        let frame = match self.camera.as_mut().map(|camera| camera.capture()) {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => return Err(self.refuse(err.into())),
            None => return Err(self.refuse(ActionError::CameraOff)),
        };
        self.submit(frame);
        Ok(())
    }

    /// Start the auto-poll timer, replacing a running one.
    pub fn start_auto(&mut self) -> Result<(), ActionError> {
        self.ensure_capture_allowed()?;
        self.auto_poll = None;

        self.generation += 1;
        let generation = self.generation;
        let period = self.interval;
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events.send(Event::Tick(generation)).is_err() {
                    break;
                }
            }
        });
        log::info!("Auto-detect every {:?}", period);

        self.auto_poll = Some(AutoPoll { generation, handle });
        self.refresh(Change::Controls);
        Ok(())
    }

    /// Stop the auto-poll timer. Requests already sent still complete.
    pub fn stop_auto(&mut self) {
        if self.auto_poll.take().is_some() {
            log::info!("Auto-detect stopped");
            self.refresh(Change::Controls);
        }
    }

    pub fn toggle_auto(&mut self) -> Result<(), ActionError> {
        if self.auto_poll.is_some() {
            self.stop_auto();
            Ok(())
        } else {
            self.start_auto()
        }
    }

    /// Upload a file. Works regardless of camera and readiness.
    pub fn upload(&mut self, path: PathBuf) {
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = upload_file(service.as_ref(), &path).await;
            events.send(Event::UploadDone(result)).ok();
        });
    }

    fn ensure_capture_allowed(&mut self) -> Result<(), ActionError> {
        if !self.readiness.is_ready() {
            Err(self.refuse(ActionError::NotReady))
        } else if self.camera.is_none() {
            Err(self.refuse(ActionError::CameraOff))
        } else {
            Ok(())
        }
    }

    fn refuse(&mut self, err: ActionError) -> ActionError {
        self.view.alert(err.to_string());
        self.refresh(Change::Alert);
        err
    }

    fn submit(&mut self, frame: Frame) {
        self.in_flight += 1;
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = detect_frame(service.as_ref(), frame).await;
            events.send(Event::DetectDone(result)).ok();
        });
    }

    fn on_tick(&mut self, generation: u64) {
        let current = self.auto_poll.as_ref().map(|auto_poll| auto_poll.generation);
        if current != Some(generation) {
            log::trace!("Ignoring tick of stopped timer {}", generation);
            return;
        }
        if let Err(err) = self.capture() {
            log::warn!("Auto-detect capture failed: {}", err);
        }
    }

    fn on_ready(&mut self, result: Result<ReadyResponse, ClientError>) {
        self.readiness = match result {
            Ok(ReadyResponse { ready: true, .. }) => Readiness::Ready,
            Ok(ReadyResponse { ready: false, error }) => Readiness::Failed(
                error.unwrap_or_else(|| "detection model not initialized".to_owned()),
            ),
            Err(err) => Readiness::Failed(err.to_string()),
        };

        self.view.status = match &self.readiness {
            Readiness::Ready => {
                log::info!("Detection service ready");
                Status::Ready
            }
            Readiness::Failed(msg) => {
                log::error!("Detection service not ready: {}", msg);
                Status::Error(msg.clone())
            }
            Readiness::Pending => Status::Loading,
        };
        self.refresh(Change::Status);
    }

    fn on_detect(&mut self, result: Result<DetectionResponse, ClientError>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match result {
            Ok(response) => {
                log::info!("{} detections", response.detections.len());
                self.view.show_detection(response);
                self.refresh(Change::Detection);
            }
            Err(err) => {
                log::warn!("Detect failed: {}", err);
                self.view.show_detect_error(err.to_string());
                self.refresh(Change::DetectError);
            }
        }
    }

    fn on_upload(&mut self, result: Result<String, ClientError>) {
        let msg = match result {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("Upload failed: {}", err);
                format!("Upload failed: {err}")
            }
        };
        self.view.upload_message = Some(msg);
        self.refresh(Change::Upload);
    }

    fn shutdown(&mut self) {
        self.auto_poll = None;
        if let Some(camera) = self.camera.take() {
            camera.release();
        }
    }

    fn refresh(&mut self, change: Change) {
        self.view.controls = self.controls();
        self.surface.refresh(&self.view, change);
    }
}

/// Snapshot a frame and submit it for detection.
pub async fn detect_frame<S: DetectService + ?Sized>(
    service: &S,
    frame: Frame,
) -> Result<DetectionResponse, ClientError> {
    let image = snapshot(&frame)?;
    service.detect(image).await
}
