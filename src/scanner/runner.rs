//! Async scan runner
//!
//! One tokio task owns the [`ScanController`] and the camera. It turns
//! controller actions into timers and pipeline cycles, and publishes the
//! results. Cycles run on their own tasks and report back over an internal
//! channel.

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::controller::{Action, ControllerEvent, ScanController, ScanTimings};
use super::manual::{check_manual, ManualEntry};
use super::session::ScanState;
use crate::analysis::{extract_best, DetectionEvent, DigitString, EventEmitter, ValidNumberSet};
use crate::capture::{
    acquire_camera, set_torch_if_supported, CameraFacing, CameraProvider, CapturedFrame,
    FrameSource,
};
use crate::config::{AppConfig, PreprocessingOptions, ScanFrameSpec};
use crate::error::ScanError;
use crate::shared::{ScanCommand, ScanStatus, ScanUpdate, SharedStatus};
use crate::vision::{
    region, EngineGuard, ImagePreprocessor, OcrEngine, OcrOverrides, OcrProfile, SharedEngine,
    Technique,
};

const COMMAND_BUFFER: usize = 32;

/// Everything a cycle needs, captured when the cycle starts
struct CycleInput {
    frame: Option<CapturedFrame>,
    spec: ScanFrameSpec,
    zoom: f32,
    options: Arc<PreprocessingOptions>,
    technique: Technique,
    preprocessor: ImagePreprocessor,
    engine: SharedEngine,
}

/// Extract, preprocess, recognize and pick the best candidate
async fn run_cycle(input: CycleInput) -> Result<Option<DigitString>, ScanError> {
    let frame = input
        .frame
        .ok_or_else(|| ScanError::InvalidFrame("no frame available".to_string()))?;
    if frame.is_empty() {
        return Err(ScanError::InvalidFrame("camera frame is empty".to_string()));
    }

    let region = region::extract(&frame.image, &input.spec, input.zoom)?;
    let bitmap = input
        .preprocessor
        .process(&region.image, &input.options, input.technique);

    let output = input.engine.lock().await.recognize(&bitmap).await?;
    debug!(text = %output.text.escape_debug(), confidence = output.confidence, "OCR output");
    Ok(extract_best(&output.text))
}

/// Handle to a running scanner
pub struct ScanHandle {
    commands: mpsc::Sender<ScanCommand>,
    status: SharedStatus,
    updates: Arc<EventEmitter<ScanUpdate>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScanHandle {
    /// Queue a command for the runner
    pub async fn send(&self, command: ScanCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("scan runner has stopped"))
    }

    pub async fn start(&self) -> Result<()> {
        self.send(ScanCommand::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(ScanCommand::Stop).await
    }

    /// Latest status snapshot
    pub fn status(&self) -> ScanStatus {
        self.status.read().clone()
    }

    /// Receive feedback, detections and state changes
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<ScanUpdate> {
        self.updates.subscribe()
    }

    /// Stop scanning, shut the OCR engine down and wait for the task
    pub async fn shutdown(self) -> Result<()> {
        if self.commands.send(ScanCommand::Shutdown).await.is_err() {
            self.cancel.cancel();
        }
        self.task.await.context("scan runner task failed to join")
    }
}

/// The control loop
pub struct ScanRunner {
    controller: ScanController,
    provider: Arc<dyn CameraProvider>,
    camera: Option<Box<dyn FrameSource>>,
    engine: EngineGuard,
    preprocessor: ImagePreprocessor,
    spec: ScanFrameSpec,
    zoom: f32,
    options: Arc<PreprocessingOptions>,
    technique: Technique,
    overrides: OcrOverrides,
    tick_interval: Duration,
    keypad: ManualEntry,
    /// Facing requested by the last camera switch
    preferred_facing: Option<CameraFacing>,
    timers: Vec<JoinHandle<()>>,
    /// Task of the cycle in flight, aborted when the controller gives up on it
    cycle_task: Option<(u64, JoinHandle<()>)>,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    status: SharedStatus,
    updates: Arc<EventEmitter<ScanUpdate>>,
}

impl ScanRunner {
    /// Configure the engine and spawn the runner task
    pub fn spawn(
        config: &AppConfig,
        provider: Arc<dyn CameraProvider>,
        mut engine: Box<dyn OcrEngine>,
        numbers: Arc<ValidNumberSet>,
    ) -> ScanHandle {
        let config = config.clone().sanitized();
        engine.configure(config.ocr.profile, &config.ocr.overrides);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let status: SharedStatus = Arc::new(RwLock::new(ScanStatus {
            profile: config.ocr.profile,
            zoom: config.scan.zoom,
            ..ScanStatus::default()
        }));
        let updates = Arc::new(EventEmitter::new());
        let cancel = CancellationToken::new();

        let runner = ScanRunner {
            controller: ScanController::new(ScanTimings::from(&config.scan), numbers),
            provider,
            camera: None,
            engine: EngineGuard::new(engine),
            preprocessor: ImagePreprocessor::new(config.preprocessing.backend),
            spec: config.frame,
            zoom: config.scan.zoom,
            options: Arc::new(config.preprocessing.options.clone()),
            technique: config.preprocessing.technique,
            overrides: config.ocr.overrides.clone(),
            tick_interval: config.scan.tick_interval(),
            keypad: ManualEntry::new(),
            preferred_facing: None,
            timers: Vec::new(),
            cycle_task: None,
            events_tx,
            events_rx,
            status: Arc::clone(&status),
            updates: Arc::clone(&updates),
        };

        let task = tokio::spawn(runner.run(command_rx, cancel.clone()));

        ScanHandle {
            commands: command_tx,
            status,
            updates,
            cancel,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<ScanCommand>, cancel: CancellationToken) {
        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scan runner cancelled");
                    break;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("Command channel closed");
                        break;
                    };
                    let starting = matches!(command, ScanCommand::Start);
                    if !self.handle_command(command).await {
                        break;
                    }
                    if starting {
                        // First capture right away instead of one interval later
                        ticker.reset_immediately();
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    self.dispatch(event).await;
                }
                _ = ticker.tick() => {
                    self.dispatch(ControllerEvent::Tick).await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Returns false when the runner should exit
    async fn handle_command(&mut self, command: ScanCommand) -> bool {
        debug!(?command, "Scan command");
        match command {
            ScanCommand::Start => self.dispatch(ControllerEvent::Start).await,
            ScanCommand::Stop => self.dispatch(ControllerEvent::Stop).await,
            ScanCommand::ManualMode => self.dispatch(ControllerEvent::ManualMode).await,
            ScanCommand::SetProfile(profile) => {
                self.status.write().profile = profile;
                self.dispatch(ControllerEvent::SetProfile(profile)).await;
            }
            ScanCommand::SwitchCamera(facing) => {
                self.preferred_facing = Some(facing);
                if self.controller.session().is_some() {
                    self.acquire().await;
                }
            }
            ScanCommand::SetZoom(zoom) => {
                self.zoom = if zoom.is_finite() { zoom.max(1.0) } else { 1.0 };
                self.status.write().zoom = self.zoom;
            }
            ScanCommand::SetPreprocessing(options) => {
                self.options = Arc::new(options.clamped());
            }
            ScanCommand::SetTechnique(technique) => {
                self.technique = technique;
            }
            ScanCommand::SetTorch(on) => {
                if let Some(camera) = self.camera.as_deref() {
                    set_torch_if_supported(camera, on);
                }
            }
            ScanCommand::SubmitManual(input) => {
                let result = check_manual(&input, self.controller.numbers());
                self.manual_checked(result);
            }
            ScanCommand::Keypad(key) => {
                let result = self.keypad.press(key, self.controller.numbers());
                self.status.write().keypad = self.keypad.buffer().to_string();
                if let Some(result) = result {
                    self.manual_checked(result);
                }
            }
            ScanCommand::SetNumbers(numbers) => {
                info!(count = numbers.len(), "Valid number list replaced");
                self.controller.set_numbers(numbers);
            }
            ScanCommand::Shutdown => return false,
        }
        true
    }

    fn manual_checked(&mut self, result: Result<DetectionEvent, ScanError>) {
        match result {
            Ok(event) => {
                info!(number = %event.number, is_valid = event.is_valid, "Manual entry checked");
                let message = if event.is_valid {
                    format!("Number {} is valid", event.number)
                } else {
                    format!("Number {} is not in the list", event.number)
                };
                self.publish_detection(event);
                self.publish_feedback(message);
            }
            Err(err) => {
                debug!("Manual entry rejected: {}", err);
                self.publish_feedback(err.feedback());
            }
        }
    }

    async fn dispatch(&mut self, event: ControllerEvent) {
        let actions = self.controller.dispatch(event);
        for action in actions {
            self.execute(action).await;
        }
        self.sync_status();
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::AcquireCamera => self.acquire().await,
            Action::ReleaseCamera => self.release_camera(),
            Action::ClearTimers => {
                for timer in self.timers.drain(..) {
                    timer.abort();
                }
            }
            Action::StartCycle { cycle, confirming } => self.start_cycle(cycle, confirming),
            Action::AbortCycle { cycle } => self.abort_cycle(cycle),
            Action::ArmWatchdog { cycle, after } => {
                self.schedule(after, ControllerEvent::WatchdogFired { cycle });
            }
            Action::ScheduleConfirmation { epoch, after } => {
                self.schedule(after, ControllerEvent::ConfirmDue { epoch });
            }
            Action::ScheduleCooldown { epoch, after } => {
                self.schedule(after, ControllerEvent::CooldownElapsed { epoch });
            }
            Action::ApplyProfile(profile) => self.apply_profile(profile),
            Action::Feedback(message) => self.publish_feedback(message),
            Action::Emit(event) => self.publish_detection(event),
            Action::ModeChanged(mode) => {
                self.status.write().mode = mode;
                self.updates.emit(ScanUpdate::ModeChanged(mode));
            }
        }
    }

    /// Release the current camera, then open a new one. Failure switches the
    /// controller to manual entry.
    async fn acquire(&mut self) {
        self.release_camera();

        let result = match self.preferred_facing {
            Some(facing) if facing != CameraFacing::Any => {
                match self.provider.open(facing).await {
                    Ok(camera) => Ok(camera),
                    Err(e) => {
                        debug!(facing = %facing, "Requested camera unavailable: {}", e);
                        acquire_camera(self.provider.as_ref()).await
                    }
                }
            }
            _ => acquire_camera(self.provider.as_ref()).await,
        };

        match result {
            Ok(camera) => {
                let facing = camera.facing();
                self.camera = Some(camera);
                {
                    let mut status = self.status.write();
                    status.camera = Some(facing);
                    status.clear_error();
                }
                self.updates.emit(ScanUpdate::CameraChanged(Some(facing)));
            }
            Err(err) => {
                self.status.write().set_error(err.to_string());
                // Handled on the next loop iteration, after the current actions
                let _ = self.events_tx.send(ControllerEvent::CameraFailed(err));
            }
        }
    }

    fn release_camera(&mut self) {
        if let Some(camera) = self.camera.take() {
            camera.stop();
            self.status.write().camera = None;
            self.updates.emit(ScanUpdate::CameraChanged(None));
            debug!("Camera released");
        }
    }

    fn start_cycle(&mut self, cycle: u64, confirming: bool) {
        let input = CycleInput {
            frame: self.camera.as_ref().and_then(|c| c.current_frame()),
            spec: self.spec,
            zoom: self.zoom,
            options: Arc::clone(&self.options),
            technique: self.technique,
            preprocessor: self.preprocessor,
            engine: self.engine.shared(),
        };
        self.status.write().cycles += 1;

        let tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let result = run_cycle(input).await;
            debug!(cycle, confirming, ok = result.is_ok(), "Cycle finished");
            let _ = tx.send(ControllerEvent::CycleCompleted { cycle, result });
        });
        self.cycle_task = Some((cycle, task));
    }

    /// Dropping the task releases the engine lock and kills any OCR child
    /// process still running for it.
    fn abort_cycle(&mut self, cycle: u64) {
        match self.cycle_task.take() {
            Some((id, task)) if id == cycle => {
                if !task.is_finished() {
                    debug!(cycle, "Aborting cycle task");
                    task.abort();
                }
            }
            other => self.cycle_task = other,
        }
    }

    fn schedule(&mut self, after: Duration, event: ControllerEvent) {
        self.timers.retain(|t| !t.is_finished());
        let tx = self.events_tx.clone();
        self.timers.push(tokio::spawn(async move {
            time::sleep(after).await;
            let _ = tx.send(event);
        }));
    }

    fn apply_profile(&mut self, profile: OcrProfile) {
        let engine = self.engine.shared();
        let overrides = self.overrides.clone();
        // A hung cycle may still hold the engine; do not block the loop on it
        tokio::spawn(async move {
            engine.lock().await.configure(profile, &overrides);
            info!(?profile, "OCR profile applied");
        });
    }

    fn publish_feedback(&mut self, message: String) {
        self.status.write().feedback = message.clone();
        self.updates.emit(ScanUpdate::Feedback(message));
    }

    fn publish_detection(&mut self, event: DetectionEvent) {
        {
            let mut status = self.status.write();
            status.detections += 1;
            status.last_detection = Some(event.clone());
        }
        self.updates.emit(ScanUpdate::Detected(event));
    }

    /// Copy controller state into the shared status
    fn sync_status(&mut self) {
        let state = self.controller.state();
        let changed = {
            let mut status = self.status.write();
            let session = self.controller.session();
            status.session_id = session.map(|s| s.id);
            status.pending = session.and_then(|s| s.pending_candidate.clone());
            let changed = status.state != state;
            status.state = state;
            changed
        };
        if changed {
            self.updates.emit(ScanUpdate::StateChanged(state));
        }
    }

    async fn shutdown(mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        if let Some((_, task)) = self.cycle_task.take() {
            task.abort();
        }
        self.release_camera();
        {
            let mut status = self.status.write();
            status.state = ScanState::Idle;
            status.session_id = None;
            status.pending = None;
        }
        // Waits for in-flight recognition, bounded in case a cycle hung
        if time::timeout(Duration::from_secs(2), self.engine.shutdown())
            .await
            .is_err()
        {
            warn!("OCR engine still busy at shutdown");
        }
        info!("Scan runner stopped");
    }
}
