//! Scan controller state machine
//!
//! Pure and synchronous: every input is a [`ControllerEvent`] passed to
//! [`ScanController::dispatch`], which returns the [`Action`]s the runner must
//! carry out (timers, pipeline cycles, feedback, emitted detections). Cycle
//! ids and session epochs make late timers and late cycle results harmless.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::session::{ScanSession, ScanState};
use crate::analysis::{DetectionEvent, DetectionSource, DigitString, ValidNumberSet};
use crate::config::ScanSettings;
use crate::error::ScanError;
use crate::shared::ScanMode;
use crate::vision::OcrProfile;

pub const FEEDBACK_STARTING: &str = "Starting camera...";
pub const FEEDBACK_SCANNING: &str = "Scanning for numbers...";
pub const FEEDBACK_PROCESSING: &str = "Processing...";
pub const FEEDBACK_NO_NUMBER: &str = "No numbers detected";
pub const FEEDBACK_VERIFY_NO_NUMBER: &str = "Verification failed - no number found";
pub const FEEDBACK_STOPPED: &str = "Scanning stopped";
pub const FEEDBACK_MANUAL: &str = "Manual entry";

/// Inputs to the state machine
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Start,
    Stop,
    /// Periodic capture tick
    Tick,
    /// Confirmation delay elapsed
    ConfirmDue { epoch: u64 },
    /// A pipeline cycle finished
    CycleCompleted {
        cycle: u64,
        result: Result<Option<DigitString>, ScanError>,
    },
    WatchdogFired { cycle: u64 },
    CooldownElapsed { epoch: u64 },
    /// No camera could be opened
    CameraFailed(ScanError),
    SetProfile(OcrProfile),
    /// Leave camera scanning for keypad entry
    ManualMode,
}

/// Work for the runner
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AcquireCamera,
    ReleaseCamera,
    /// Abort pending timers
    ClearTimers,
    StartCycle { cycle: u64, confirming: bool },
    /// Drop a cycle task that is still running, freeing the engine
    AbortCycle { cycle: u64 },
    ArmWatchdog { cycle: u64, after: Duration },
    ScheduleConfirmation { epoch: u64, after: Duration },
    ScheduleCooldown { epoch: u64, after: Duration },
    ApplyProfile(OcrProfile),
    Feedback(String),
    Emit(DetectionEvent),
    ModeChanged(ScanMode),
}

/// Delays used by the controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanTimings {
    pub confirm_delay: Duration,
    pub cooldown: Duration,
    pub watchdog: Duration,
}

impl From<&ScanSettings> for ScanTimings {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            confirm_delay: settings.confirm_delay(),
            cooldown: settings.cooldown(),
            watchdog: settings.watchdog(),
        }
    }
}

impl Default for ScanTimings {
    fn default() -> Self {
        Self::from(&ScanSettings::default())
    }
}

/// Capture-recognize-verify state machine
pub struct ScanController {
    timings: ScanTimings,
    numbers: Arc<ValidNumberSet>,
    session: Option<ScanSession>,
    mode: ScanMode,
    /// Bumped on every start so timers from older sessions are ignored
    epoch: u64,
    /// Last cycle id handed out, never reset
    cycle: u64,
    in_flight: Option<u64>,
    confirm_scheduled: bool,
    queued_profile: Option<OcrProfile>,
}

impl ScanController {
    pub fn new(timings: ScanTimings, numbers: Arc<ValidNumberSet>) -> Self {
        Self {
            timings,
            numbers,
            session: None,
            mode: ScanMode::Camera,
            epoch: 0,
            cycle: 0,
            in_flight: None,
            confirm_scheduled: false,
            queued_profile: None,
        }
    }

    pub fn state(&self) -> ScanState {
        self.session
            .as_ref()
            .map(ScanSession::state)
            .unwrap_or(ScanState::Idle)
    }

    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn numbers(&self) -> &Arc<ValidNumberSet> {
        &self.numbers
    }

    /// Replace the valid set; used from the next accepted number on
    pub fn set_numbers(&mut self, numbers: Arc<ValidNumberSet>) {
        self.numbers = numbers;
    }

    /// Feed one event into the state machine
    pub fn dispatch(&mut self, event: ControllerEvent) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            ControllerEvent::Start => self.on_start(&mut actions),
            ControllerEvent::Stop => self.on_stop(&mut actions),
            ControllerEvent::Tick => self.on_tick(&mut actions),
            ControllerEvent::ConfirmDue { epoch } => self.on_confirm_due(epoch, &mut actions),
            ControllerEvent::CycleCompleted { cycle, result } => {
                self.on_cycle_completed(cycle, result, &mut actions)
            }
            ControllerEvent::WatchdogFired { cycle } => self.on_watchdog(cycle, &mut actions),
            ControllerEvent::CooldownElapsed { epoch } => self.on_cooldown(epoch, &mut actions),
            ControllerEvent::CameraFailed(err) => self.on_camera_failed(err, &mut actions),
            ControllerEvent::SetProfile(profile) => self.on_set_profile(profile, &mut actions),
            ControllerEvent::ManualMode => self.on_manual_mode(&mut actions),
        }
        actions
    }

    fn on_start(&mut self, actions: &mut Vec<Action>) {
        if self.session.is_some() {
            return;
        }
        let session = ScanSession::new();
        info!(session = %session.id, "Scanning started");
        self.session = Some(session);
        self.epoch += 1;
        self.confirm_scheduled = false;

        if self.mode != ScanMode::Camera {
            self.mode = ScanMode::Camera;
            actions.push(Action::ModeChanged(ScanMode::Camera));
        }
        actions.push(Action::AcquireCamera);
        self.feedback(FEEDBACK_STARTING, actions);
    }

    fn on_stop(&mut self, actions: &mut Vec<Action>) {
        if !self.end_session(actions) {
            return;
        }
        info!("Scanning stopped");
        self.feedback_always(FEEDBACK_STOPPED, actions);
    }

    /// Drop the session, release the camera and timers. Returns false when
    /// there was nothing to end.
    fn end_session(&mut self, actions: &mut Vec<Action>) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        debug!(
            session = %session.id,
            elapsed_ms = session.started_at.elapsed().as_millis() as u64,
            "Ending session"
        );
        if let Some(cycle) = self.in_flight.take() {
            debug!(session = %session.id, cycle, "Dropping in-flight cycle");
            actions.push(Action::AbortCycle { cycle });
        }
        self.confirm_scheduled = false;
        actions.push(Action::ClearTimers);
        actions.push(Action::ReleaseCamera);
        if let Some(profile) = self.queued_profile.take() {
            actions.push(Action::ApplyProfile(profile));
        }
        true
    }

    fn on_tick(&mut self, actions: &mut Vec<Action>) {
        let ready = match &self.session {
            Some(s) => s.is_active && !s.is_processing && !s.is_paused && !self.confirm_scheduled,
            None => false,
        };
        if ready {
            self.start_cycle(false, actions);
        }
    }

    fn on_confirm_due(&mut self, epoch: u64, actions: &mut Vec<Action>) {
        if epoch != self.epoch || !self.confirm_scheduled {
            return;
        }
        self.confirm_scheduled = false;

        let ready = match &self.session {
            Some(s) => {
                s.is_active && !s.is_processing && !s.is_paused && s.pending_candidate.is_some()
            }
            None => false,
        };
        if ready {
            self.start_cycle(true, actions);
        }
    }

    fn start_cycle(&mut self, confirming: bool, actions: &mut Vec<Action>) {
        self.cycle += 1;
        let cycle = self.cycle;
        self.in_flight = Some(cycle);
        if let Some(session) = self.session.as_mut() {
            session.is_processing = true;
        }

        debug!(cycle, confirming, "Cycle started");
        actions.push(Action::StartCycle { cycle, confirming });
        actions.push(Action::ArmWatchdog {
            cycle,
            after: self.timings.watchdog,
        });
        if !confirming {
            self.feedback(FEEDBACK_PROCESSING, actions);
        }
    }

    /// Release the processing lock and apply a profile queued meanwhile
    fn release(&mut self, actions: &mut Vec<Action>) {
        self.in_flight = None;
        if let Some(session) = self.session.as_mut() {
            session.is_processing = false;
        }
        if let Some(profile) = self.queued_profile.take() {
            actions.push(Action::ApplyProfile(profile));
        }
    }

    fn on_cycle_completed(
        &mut self,
        cycle: u64,
        result: Result<Option<DigitString>, ScanError>,
        actions: &mut Vec<Action>,
    ) {
        if self.in_flight != Some(cycle) {
            debug!(cycle, "Ignoring stale cycle result");
            return;
        }
        self.release(actions);

        let pending = self
            .session
            .as_mut()
            .and_then(|s| s.pending_candidate.take());

        let candidate = match result {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(cycle, "Scan cycle failed: {}", err);
                self.feedback(&err.feedback(), actions);
                return;
            }
        };

        match (candidate, pending) {
            (None, Some(_)) => {
                debug!(cycle, "Confirmation found no number");
                self.feedback(FEEDBACK_VERIFY_NO_NUMBER, actions);
            }
            (None, None) => {
                debug!(cycle, "No number detected");
                self.feedback(FEEDBACK_NO_NUMBER, actions);
            }
            (Some(candidate), None) => {
                debug!(cycle, candidate = %candidate, "Possible number, scheduling confirmation");
                self.feedback(
                    &format!("Possible number found: {}. Verifying...", candidate),
                    actions,
                );
                if let Some(session) = self.session.as_mut() {
                    session.pending_candidate = Some(candidate);
                }
                self.confirm_scheduled = true;
                actions.push(Action::ScheduleConfirmation {
                    epoch: self.epoch,
                    after: self.timings.confirm_delay,
                });
            }
            (Some(candidate), Some(pending)) if candidate == pending => {
                self.accept(candidate, actions);
            }
            (Some(candidate), Some(pending)) => {
                debug!(cycle, first = %pending, second = %candidate, "Confirmation mismatch");
                self.feedback(
                    &format!(
                        "Verification failed - mismatch ({} vs {})",
                        pending, candidate
                    ),
                    actions,
                );
            }
        }
    }

    fn accept(&mut self, number: DigitString, actions: &mut Vec<Action>) {
        let is_valid = self.numbers.is_valid(&number);
        info!(number = %number, is_valid, "Number verified");

        self.feedback(&format!("Verified number: {}", number), actions);
        actions.push(Action::Emit(DetectionEvent::new(
            number,
            is_valid,
            DetectionSource::Camera,
        )));

        if let Some(session) = self.session.as_mut() {
            session.is_paused = true;
        }
        actions.push(Action::ScheduleCooldown {
            epoch: self.epoch,
            after: self.timings.cooldown,
        });
    }

    fn on_watchdog(&mut self, cycle: u64, actions: &mut Vec<Action>) {
        if self.in_flight != Some(cycle) {
            return;
        }
        warn!(cycle, "Scan cycle timed out, releasing lock");
        actions.push(Action::AbortCycle { cycle });
        self.release(actions);
        if let Some(session) = self.session.as_mut() {
            session.pending_candidate = None;
        }
        self.feedback(&ScanError::OcrTimeout(self.timings.watchdog).feedback(), actions);
    }

    fn on_cooldown(&mut self, epoch: u64, actions: &mut Vec<Action>) {
        if epoch != self.epoch {
            return;
        }
        let resumed = match self.session.as_mut() {
            Some(session) if session.is_paused => {
                session.is_paused = false;
                true
            }
            _ => false,
        };
        if resumed {
            debug!("Cooldown over, resuming");
            self.feedback(FEEDBACK_SCANNING, actions);
        }
    }

    fn on_camera_failed(&mut self, err: ScanError, actions: &mut Vec<Action>) {
        warn!("Camera unavailable: {}", err);
        self.end_session(actions);
        self.feedback_always(&err.feedback(), actions);
        self.switch_mode(ScanMode::Manual, actions);
    }

    fn on_manual_mode(&mut self, actions: &mut Vec<Action>) {
        if self.end_session(actions) {
            info!("Switched to manual entry");
        }
        self.feedback(FEEDBACK_MANUAL, actions);
        self.switch_mode(ScanMode::Manual, actions);
    }

    fn on_set_profile(&mut self, profile: OcrProfile, actions: &mut Vec<Action>) {
        if self.in_flight.is_some() {
            debug!(?profile, "Cycle in flight, queueing profile change");
            self.queued_profile = Some(profile);
        } else {
            actions.push(Action::ApplyProfile(profile));
        }
    }

    fn switch_mode(&mut self, mode: ScanMode, actions: &mut Vec<Action>) {
        if self.mode != mode {
            self.mode = mode;
            actions.push(Action::ModeChanged(mode));
        }
    }

    /// Set feedback, skipping repeats of the current message
    fn feedback(&mut self, message: &str, actions: &mut Vec<Action>) {
        if let Some(session) = self.session.as_ref() {
            if session.last_feedback == message {
                return;
            }
        }
        self.feedback_always(message, actions);
    }

    fn feedback_always(&mut self, message: &str, actions: &mut Vec<Action>) {
        if let Some(session) = self.session.as_mut() {
            session.last_feedback = message.to_string();
        }
        actions.push(Action::Feedback(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ScanController {
        ScanController::new(
            ScanTimings::default(),
            Arc::new(ValidNumberSet::new(["0042", "1234"])),
        )
    }

    fn digits(s: &str) -> Option<DigitString> {
        DigitString::normalize(s)
    }

    fn started() -> ScanController {
        let mut c = controller();
        c.dispatch(ControllerEvent::Start);
        c
    }

    fn start_cycle(actions: &[Action]) -> Option<(u64, bool)> {
        actions.iter().find_map(|a| match a {
            Action::StartCycle { cycle, confirming } => Some((*cycle, *confirming)),
            _ => None,
        })
    }

    fn emitted(actions: &[Action]) -> Vec<DetectionEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn feedback(actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Feedback(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    fn complete(c: &mut ScanController, cycle: u64, text: &str) -> Vec<Action> {
        c.dispatch(ControllerEvent::CycleCompleted {
            cycle,
            result: Ok(crate::analysis::extract_best(text)),
        })
    }

    /// Run the first reading and its confirmation, returning the actions of
    /// the confirmation result
    fn read_twice(c: &mut ScanController, first: &str, second: &str) -> Vec<Action> {
        let (cycle, _) = start_cycle(&c.dispatch(ControllerEvent::Tick)).unwrap();
        complete(c, cycle, first);
        let epoch = c.epoch;
        let (cycle, confirming) =
            start_cycle(&c.dispatch(ControllerEvent::ConfirmDue { epoch })).unwrap();
        assert!(confirming);
        complete(c, cycle, second)
    }

    #[test]
    fn test_start_acquires_camera() {
        let mut c = controller();
        let actions = c.dispatch(ControllerEvent::Start);
        assert!(actions.contains(&Action::AcquireCamera));
        assert_eq!(c.state(), ScanState::Streaming);

        // Second start is a no-op
        assert!(c.dispatch(ControllerEvent::Start).is_empty());
    }

    #[test]
    fn test_tick_ignored_when_idle() {
        let mut c = controller();
        assert!(c.dispatch(ControllerEvent::Tick).is_empty());
    }

    #[test]
    fn test_overlapping_ticks_dropped() {
        let mut c = started();
        let first = c.dispatch(ControllerEvent::Tick);
        assert_eq!(start_cycle(&first), Some((1, false)));
        assert_eq!(c.state(), ScanState::Capturing);

        assert!(c.dispatch(ControllerEvent::Tick).is_empty());
        assert!(c.dispatch(ControllerEvent::Tick).is_empty());
    }

    #[test]
    fn test_cycle_arms_watchdog() {
        let mut c = started();
        let actions = c.dispatch(ControllerEvent::Tick);
        assert!(actions.contains(&Action::ArmWatchdog {
            cycle: 1,
            after: Duration::from_secs(8)
        }));
    }

    #[test]
    fn test_same_number_twice_emits_once() {
        let mut c = started();
        let actions = read_twice(&mut c, "1234", "1234");

        let events = emitted(&actions);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].number.as_str(), "1234");
        assert!(events[0].is_valid);
        assert_eq!(events[0].source, DetectionSource::Camera);
        assert_eq!(c.state(), ScanState::Paused);
        assert!(c.session().unwrap().pending_candidate.is_none());
        let cooldown = Duration::from_secs(2);
        assert!(actions.iter().any(
            |a| matches!(a, Action::ScheduleCooldown { after, .. } if *after == cooldown)
        ));
    }

    #[test]
    fn test_padded_confirmation_matches() {
        let mut c = started();
        let actions = read_twice(&mut c, "042", "0042");

        let events = emitted(&actions);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].number.as_str(), "0042");
        assert!(events[0].is_valid);
    }

    #[test]
    fn test_mismatch_rejects_and_starts_fresh() {
        let mut c = started();
        let actions = read_twice(&mut c, "1234", "5678");

        assert!(emitted(&actions).is_empty());
        assert!(feedback(&actions)[0].contains("mismatch"));
        assert_eq!(c.state(), ScanState::Streaming);
        assert!(c.session().unwrap().pending_candidate.is_none());

        // Next tick is a fresh first reading
        assert_eq!(start_cycle(&c.dispatch(ControllerEvent::Tick)), Some((3, false)));
    }

    #[test]
    fn test_confirmation_without_number() {
        let mut c = started();
        let actions = read_twice(&mut c, "1234", "no digits");
        assert_eq!(feedback(&actions), vec![FEEDBACK_VERIFY_NO_NUMBER.to_string()]);
        assert!(c.session().unwrap().pending_candidate.is_none());
    }

    #[test]
    fn test_no_number_feedback() {
        let mut c = started();
        c.dispatch(ControllerEvent::Tick);
        let actions = complete(&mut c, 1, "");
        assert_eq!(feedback(&actions), vec![FEEDBACK_NO_NUMBER.to_string()]);
        assert_eq!(c.state(), ScanState::Streaming);
    }

    #[test]
    fn test_ticks_wait_for_scheduled_confirmation() {
        let mut c = started();
        c.dispatch(ControllerEvent::Tick);
        let actions = complete(&mut c, 1, "1234");
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ScheduleConfirmation { .. })));

        assert!(c.dispatch(ControllerEvent::Tick).is_empty());
    }

    #[test]
    fn test_paused_ticks_skipped_until_cooldown() {
        let mut c = started();
        read_twice(&mut c, "1234", "1234");

        assert!(c.dispatch(ControllerEvent::Tick).is_empty());
        let epoch = c.epoch;
        c.dispatch(ControllerEvent::CooldownElapsed { epoch });
        assert_eq!(c.state(), ScanState::Streaming);
        assert!(start_cycle(&c.dispatch(ControllerEvent::Tick)).is_some());
    }

    #[test]
    fn test_error_releases_lock_with_generic_feedback() {
        let mut c = started();
        c.dispatch(ControllerEvent::Tick);
        let actions = c.dispatch(ControllerEvent::CycleCompleted {
            cycle: 1,
            result: Err(ScanError::OcrFailure("boom".to_string())),
        });

        assert_eq!(
            feedback(&actions),
            vec!["Error while scanning. Trying again...".to_string()]
        );
        assert!(!c.session().unwrap().is_processing);
    }

    #[test]
    fn test_watchdog_releases_hung_cycle() {
        let mut c = started();
        c.dispatch(ControllerEvent::Tick);
        let actions = c.dispatch(ControllerEvent::WatchdogFired { cycle: 1 });

        assert!(!c.session().unwrap().is_processing);
        assert!(actions.contains(&Action::AbortCycle { cycle: 1 }));
        assert!(feedback(&actions)[0].contains("timed out"));

        // The late result is ignored
        assert!(complete(&mut c, 1, "1234").is_empty());
        assert!(c.session().unwrap().pending_candidate.is_none());

        // And the next tick runs
        assert_eq!(start_cycle(&c.dispatch(ControllerEvent::Tick)), Some((2, false)));
    }

    #[test]
    fn test_watchdog_for_finished_cycle_ignored() {
        let mut c = started();
        c.dispatch(ControllerEvent::Tick);
        complete(&mut c, 1, "");
        assert!(c.dispatch(ControllerEvent::WatchdogFired { cycle: 1 }).is_empty());
    }

    #[test]
    fn test_stop_releases_camera_and_ignores_late_result() {
        let mut c = started();
        c.dispatch(ControllerEvent::Tick);
        let actions = c.dispatch(ControllerEvent::Stop);

        assert!(actions.contains(&Action::ReleaseCamera));
        assert!(actions.contains(&Action::ClearTimers));
        assert!(actions.contains(&Action::AbortCycle { cycle: 1 }));
        assert_eq!(c.state(), ScanState::Idle);
        assert!(complete(&mut c, 1, "1234").is_empty());
    }

    #[test]
    fn test_stale_confirmation_from_old_session_ignored() {
        let mut c = started();
        c.dispatch(ControllerEvent::Tick);
        complete(&mut c, 1, "1234");
        let old_epoch = c.epoch;
        c.dispatch(ControllerEvent::Stop);
        c.dispatch(ControllerEvent::Start);

        assert!(c
            .dispatch(ControllerEvent::ConfirmDue { epoch: old_epoch })
            .is_empty());
    }

    #[test]
    fn test_camera_failure_switches_to_manual() {
        let mut c = started();
        let actions = c.dispatch(ControllerEvent::CameraFailed(ScanError::CameraAcquisition(
            "no device".to_string(),
        )));

        assert_eq!(c.mode(), ScanMode::Manual);
        assert_eq!(c.state(), ScanState::Idle);
        assert!(actions.contains(&Action::ModeChanged(ScanMode::Manual)));
        assert!(feedback(&actions)[0].contains("manual"));
    }

    #[test]
    fn test_start_after_manual_returns_to_camera() {
        let mut c = started();
        c.dispatch(ControllerEvent::ManualMode);
        assert_eq!(c.mode(), ScanMode::Manual);

        let actions = c.dispatch(ControllerEvent::Start);
        assert!(actions.contains(&Action::ModeChanged(ScanMode::Camera)));
    }

    #[test]
    fn test_profile_change_queued_while_processing() {
        let mut c = started();
        c.dispatch(ControllerEvent::Tick);

        assert!(c
            .dispatch(ControllerEvent::SetProfile(OcrProfile::Accurate))
            .is_empty());

        let actions = complete(&mut c, 1, "");
        assert!(actions.contains(&Action::ApplyProfile(OcrProfile::Accurate)));
    }

    #[test]
    fn test_profile_change_applied_when_idle() {
        let mut c = controller();
        let actions = c.dispatch(ControllerEvent::SetProfile(OcrProfile::Fast));
        assert_eq!(actions, vec![Action::ApplyProfile(OcrProfile::Fast)]);
    }
}
