//! Upload and registration state machine
//!
//! The machine owns no timers. It records when the next check is due and
//! when polling gives up, and `tick` tells the caller what to do next. Any
//! scheduler can drive it; [`super::PollerHandle`] drives it on tokio.

use std::time::Duration;

use tokio::time::Instant;

use super::client::ApiError;
use super::state::{RegistrationPhase, UploadStatus, UploadWorkflowState, UploadedWorkflow};
use crate::api::{RegistrationDescriptor, RegistrationStatus};

/// Delay between registration checks
pub const POLL_INTERVAL: Duration = Duration::from_millis(3_000);

/// Polling budget measured from entering `polling`
pub const POLL_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Shortest interval `with_timing` accepts
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What the driver should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run one status check now, then call `tick` with its result
    Check,
    /// Sleep until the given instant, then call `tick(now, None)`
    Wait(Instant),
    /// Nothing left to do
    Done,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PollerError {
    #[error("An upload or registration check is already in progress")]
    Busy,
}

/// Two-phase upload and registration poller
#[derive(Debug, Clone)]
pub struct RegistrationPoller {
    state: UploadWorkflowState,
    interval: Duration,
    timeout: Duration,
    next_check_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl Default for RegistrationPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationPoller {
    pub fn new() -> Self {
        Self::with_timing(POLL_INTERVAL, POLL_TIMEOUT)
    }

    /// Custom timing; an interval below 1ms is raised to 1ms
    pub fn with_timing(interval: Duration, timeout: Duration) -> Self {
        Self {
            state: UploadWorkflowState::default(),
            interval: interval.max(MIN_POLL_INTERVAL),
            timeout,
            next_check_at: None,
            deadline: None,
        }
    }

    pub fn state(&self) -> &UploadWorkflowState {
        &self.state
    }

    /// Whether the repeating check is armed
    pub fn interval_armed(&self) -> bool {
        self.next_check_at.is_some()
    }

    /// Whether the timeout is armed
    pub fn timeout_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Enter `uploading`
    ///
    /// Starting over after a terminal state is allowed and clears it.
    pub fn start_upload(&mut self) -> Result<(), PollerError> {
        if self.state.is_active() {
            return Err(PollerError::Busy);
        }

        self.reset();
        self.state.upload_status = UploadStatus::Uploading;
        Ok(())
    }

    /// Record the upload result
    ///
    /// A successful upload enters `polling` and asks for an immediate check.
    pub fn finish_upload(
        &mut self,
        now: Instant,
        result: Result<UploadedWorkflow, String>,
    ) -> Step {
        if self.state.upload_status != UploadStatus::Uploading {
            tracing::debug!("Discarding upload result outside of uploading");
            return Step::Done;
        }

        match result {
            Ok(uploaded) => {
                tracing::debug!(
                    file_name = %uploaded.file_name,
                    "Upload finished, polling registration"
                );
                self.state.upload_status = UploadStatus::Uploaded;
                self.state.uploaded_file = Some(uploaded);
                self.state.registration_status = RegistrationPhase::Polling;
                self.state.registration = None;
                self.state.error_message = None;
                self.next_check_at = Some(now + self.interval);
                self.deadline = Some(now + self.timeout);
                Step::Check
            }
            Err(message) => {
                tracing::debug!(%message, "Upload failed");
                self.state.upload_status = UploadStatus::Error;
                self.state.error_message = Some(message);
                Step::Done
            }
        }
    }

    /// Single transition function for the registration phase
    ///
    /// `last_result` is the outcome of the check requested by the previous
    /// `Step::Check`, or `None` when waking from `Step::Wait`.
    pub fn tick(
        &mut self,
        now: Instant,
        last_result: Option<Result<RegistrationDescriptor, ApiError>>,
    ) -> Step {
        if self.state.registration_status != RegistrationPhase::Polling {
            return Step::Done;
        }

        match last_result {
            Some(Ok(descriptor)) if descriptor.status.is_terminal() => {
                self.finish_registration(descriptor);
                return Step::Done;
            }
            Some(Ok(descriptor)) => {
                self.state.registration = Some(descriptor);
            }
            Some(Err(error)) => {
                tracing::debug!(%error, "Registration check failed, retrying");
            }
            None => {}
        }

        let (Some(deadline), Some(mut next_check_at)) = (self.deadline, self.next_check_at) else {
            return Step::Done;
        };

        if now >= deadline {
            self.disarm();
            self.state.registration_status = RegistrationPhase::Error;
            self.state.error_message = Some(format!(
                "Registration did not finish within {} seconds",
                self.timeout.as_secs()
            ));
            tracing::warn!(timeout_secs = self.timeout.as_secs(), "Registration polling timed out");
            return Step::Done;
        }

        if now >= next_check_at {
            // Re-arm on the fixed grid; a slow check makes the next one late,
            // never concurrent.
            while next_check_at <= now {
                next_check_at += self.interval;
            }
            self.next_check_at = Some(next_check_at);
            return Step::Check;
        }

        Step::Wait(next_check_at.min(deadline))
    }

    /// Cancel both timers and return to idle
    pub fn reset(&mut self) {
        self.disarm();
        self.state = UploadWorkflowState::default();
    }

    fn finish_registration(&mut self, descriptor: RegistrationDescriptor) {
        self.disarm();

        if descriptor.status == RegistrationStatus::Success {
            self.state.registration_status = RegistrationPhase::Success;
        } else {
            self.state.registration_status = RegistrationPhase::Failed;
            self.state.error_message = Some(
                descriptor
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("Registration of {} failed", descriptor.file_name)),
            );
        }

        tracing::debug!(
            file_name = %descriptor.file_name,
            status = ?self.state.registration_status,
            "Registration finished"
        );
        self.state.registration = Some(descriptor);
    }

    fn disarm(&mut self) {
        self.next_check_at = None;
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploaded() -> UploadedWorkflow {
        UploadedWorkflow {
            file_name: "flow.json".to_string(),
            commit_sha: "abc123".to_string(),
            workflow_run_id: None,
            workflow_run_url: None,
        }
    }

    fn descriptor(status: RegistrationStatus) -> RegistrationDescriptor {
        RegistrationDescriptor {
            file_name: "flow.json".to_string(),
            status,
            workflow_run_url: Some(
                "https://github.com/octo/FaaSr-workflow/actions/runs/1".to_string(),
            ),
            error_message: None,
            triggered_at: None,
            completed_at: None,
        }
    }

    fn polling(start: Instant) -> RegistrationPoller {
        let mut poller = RegistrationPoller::new();
        poller.start_upload().unwrap();
        assert_eq!(poller.finish_upload(start, Ok(uploaded())), Step::Check);
        poller
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn upload_success_enters_polling_with_both_timers() {
        let poller = polling(Instant::now());
        let state = poller.state();

        assert_eq!(state.upload_status, UploadStatus::Uploaded);
        assert_eq!(state.registration_status, RegistrationPhase::Polling);
        assert_eq!(state.uploaded_file.as_ref().unwrap().commit_sha, "abc123");
        assert!(poller.interval_armed());
        assert!(poller.timeout_armed());
    }

    #[test]
    fn upload_failure_never_starts_registration() {
        let mut poller = RegistrationPoller::new();
        poller.start_upload().unwrap();

        let step =
            poller.finish_upload(Instant::now(), Err("File must be a .json file".to_string()));

        assert_eq!(step, Step::Done);
        assert_eq!(poller.state().upload_status, UploadStatus::Error);
        assert_eq!(poller.state().registration_status, RegistrationPhase::Idle);
        assert_eq!(
            poller.state().error_message.as_deref(),
            Some("File must be a .json file")
        );
        assert!(!poller.interval_armed());
        assert!(!poller.timeout_armed());
    }

    #[test]
    fn zero_interval_still_advances() {
        let t0 = Instant::now();
        let mut poller = RegistrationPoller::with_timing(Duration::ZERO, secs(10));
        poller.start_upload().unwrap();
        assert_eq!(poller.finish_upload(t0, Ok(uploaded())), Step::Check);

        let step = poller.tick(t0 + secs(1), Some(Ok(descriptor(RegistrationStatus::Pending))));
        assert_eq!(step, Step::Check);
        assert_eq!(
            poller.tick(t0 + secs(1), None),
            Step::Wait(t0 + secs(1) + Duration::from_millis(1))
        );
    }

    #[test]
    fn start_upload_is_refused_while_active() {
        let mut poller = RegistrationPoller::new();
        poller.start_upload().unwrap();
        assert_eq!(poller.start_upload(), Err(PollerError::Busy));

        poller.finish_upload(Instant::now(), Ok(uploaded()));
        assert_eq!(poller.start_upload(), Err(PollerError::Busy));
    }

    #[test]
    fn pending_pending_success() {
        let t0 = Instant::now();
        let mut poller = polling(t0);

        let step = poller.tick(
            t0 + Duration::from_millis(200),
            Some(Ok(descriptor(RegistrationStatus::Pending))),
        );
        assert_eq!(step, Step::Wait(t0 + secs(3)));
        assert_eq!(poller.tick(t0 + secs(3), None), Step::Check);

        let step = poller.tick(
            t0 + Duration::from_millis(3_200),
            Some(Ok(descriptor(RegistrationStatus::Pending))),
        );
        assert_eq!(step, Step::Wait(t0 + secs(6)));
        assert_eq!(poller.tick(t0 + secs(6), None), Step::Check);

        let step = poller.tick(
            t0 + Duration::from_millis(6_200),
            Some(Ok(descriptor(RegistrationStatus::Success))),
        );
        assert_eq!(step, Step::Done);
        assert_eq!(poller.state().registration_status, RegistrationPhase::Success);
        assert_eq!(
            poller.state().registration.as_ref().unwrap().status,
            RegistrationStatus::Success
        );
        assert!(!poller.interval_armed());
        assert!(!poller.timeout_armed());
    }

    #[test]
    fn running_updates_descriptor_and_keeps_polling() {
        let t0 = Instant::now();
        let mut poller = polling(t0);

        poller.tick(t0 + secs(1), Some(Ok(descriptor(RegistrationStatus::Running))));

        assert_eq!(poller.state().registration_status, RegistrationPhase::Polling);
        assert_eq!(
            poller.state().registration.as_ref().unwrap().status,
            RegistrationStatus::Running
        );
    }

    #[test]
    fn failed_run_is_terminal_with_message() {
        let t0 = Instant::now();
        let mut poller = polling(t0);

        let step = poller.tick(t0 + secs(1), Some(Ok(descriptor(RegistrationStatus::Failed))));

        assert_eq!(step, Step::Done);
        assert_eq!(poller.state().registration_status, RegistrationPhase::Failed);
        assert_eq!(
            poller.state().error_message.as_deref(),
            Some("Registration of flow.json failed")
        );
        assert!(!poller.interval_armed());
    }

    #[test]
    fn never_leaving_pending_times_out() {
        let t0 = Instant::now();
        let mut poller = polling(t0);
        let mut now = t0;

        loop {
            match poller.tick(now, Some(Ok(descriptor(RegistrationStatus::Pending)))) {
                Step::Check => {}
                Step::Wait(at) => {
                    now = at;
                    if poller.tick(now, None) == Step::Done {
                        break;
                    }
                }
                Step::Done => break,
            }
        }

        assert_eq!(now, t0 + POLL_TIMEOUT);
        assert_eq!(poller.state().registration_status, RegistrationPhase::Error);
        assert!(poller.state().error_message.as_deref().unwrap().contains("300 seconds"));
        assert!(!poller.interval_armed());
        assert!(!poller.timeout_armed());
    }

    #[test]
    fn transient_errors_do_not_stop_polling() {
        let t0 = Instant::now();
        let mut poller = polling(t0);

        let step = poller.tick(t0 + secs(1), Some(Err(ApiError::NotFound)));
        assert_eq!(step, Step::Wait(t0 + secs(3)));

        let step = poller.tick(
            t0 + secs(4),
            Some(Err(ApiError::Request("connection reset".to_string()))),
        );
        assert_eq!(step, Step::Check);
        assert_eq!(poller.state().registration_status, RegistrationPhase::Polling);
    }

    #[test]
    fn slow_check_fires_next_late_on_the_grid() {
        let t0 = Instant::now();
        let mut poller = polling(t0);

        // The first check took 7s, so the 3s slot was missed.
        let step = poller.tick(t0 + secs(7), Some(Ok(descriptor(RegistrationStatus::Pending))));
        assert_eq!(step, Step::Check);

        let step = poller.tick(
            t0 + Duration::from_millis(7_100),
            Some(Ok(descriptor(RegistrationStatus::Pending))),
        );
        assert_eq!(step, Step::Wait(t0 + secs(9)));
    }

    #[test]
    fn late_result_after_terminal_is_a_no_op() {
        let t0 = Instant::now();
        let mut poller = polling(t0);
        poller.tick(t0 + secs(1), Some(Ok(descriptor(RegistrationStatus::Success))));

        let step = poller.tick(t0 + secs(2), Some(Ok(descriptor(RegistrationStatus::Failed))));

        assert_eq!(step, Step::Done);
        assert_eq!(poller.state().registration_status, RegistrationPhase::Success);
        assert!(poller.state().error_message.is_none());
    }

    #[test]
    fn late_result_after_timeout_is_a_no_op() {
        let t0 = Instant::now();
        let mut poller = polling(t0);
        assert_eq!(poller.tick(t0 + POLL_TIMEOUT, None), Step::Done);

        let step = poller.tick(
            t0 + POLL_TIMEOUT + secs(1),
            Some(Ok(descriptor(RegistrationStatus::Success))),
        );

        assert_eq!(step, Step::Done);
        assert_eq!(poller.state().registration_status, RegistrationPhase::Error);
    }

    #[test]
    fn reset_cancels_both_timers() {
        let t0 = Instant::now();
        let mut poller = polling(t0);

        poller.reset();

        assert_eq!(poller.state(), &UploadWorkflowState::default());
        assert!(!poller.interval_armed());
        assert!(!poller.timeout_armed());
        assert_eq!(poller.tick(t0 + secs(3), None), Step::Done);
        assert_eq!(poller.finish_upload(t0, Ok(uploaded())), Step::Done);
    }

    #[test]
    fn restart_after_terminal_clears_previous_run() {
        let t0 = Instant::now();
        let mut poller = polling(t0);
        poller.tick(t0 + secs(1), Some(Ok(descriptor(RegistrationStatus::Failed))));

        poller.start_upload().unwrap();

        assert_eq!(poller.state().upload_status, UploadStatus::Uploading);
        assert_eq!(poller.state().registration_status, RegistrationPhase::Idle);
        assert!(poller.state().error_message.is_none());
        assert!(poller.state().registration.is_none());
    }
}
