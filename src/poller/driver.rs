//! Tokio driver for [`RegistrationPoller`]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use super::client::WorkflowsApi;
use super::machine::{PollerError, RegistrationPoller, Step};
use super::state::{UploadWorkflowState, UploadedWorkflow};

/// Owns at most one upload-and-poll task
///
/// Dropping the handle aborts the task, which cancels both timers and
/// discards any in-flight check.
pub struct PollerHandle {
    api: Arc<dyn WorkflowsApi>,
    state_tx: watch::Sender<UploadWorkflowState>,
    generation: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
    template: RegistrationPoller,
}

/// Publishes state for one spawned task until the handle moves past it
///
/// `abort` only lands at the task's next yield, so a task on another worker
/// can still reach a publish after `reset`. The generation check runs under
/// the channel's write lock, which orders it against the handle's own sends.
struct Publisher {
    state_tx: watch::Sender<UploadWorkflowState>,
    generation: Arc<AtomicU64>,
    own: u64,
}

impl Publisher {
    fn publish(&self, state: &UploadWorkflowState) -> bool {
        self.state_tx.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != self.own {
                return false;
            }
            *current = state.clone();
            true
        })
    }
}

impl PollerHandle {
    pub fn new(api: Arc<dyn WorkflowsApi>) -> Self {
        Self::with_poller(api, RegistrationPoller::new())
    }

    /// Use a preconfigured machine (custom interval or timeout)
    pub fn with_poller(api: Arc<dyn WorkflowsApi>, poller: RegistrationPoller) -> Self {
        let (state_tx, _) = watch::channel(UploadWorkflowState::default());
        Self {
            api,
            state_tx,
            generation: Arc::new(AtomicU64::new(0)),
            task: None,
            template: poller,
        }
    }

    /// Current snapshot
    pub fn state(&self) -> UploadWorkflowState {
        self.state_tx.borrow().clone()
    }

    /// Observe every published state
    pub fn subscribe(&self) -> watch::Receiver<UploadWorkflowState> {
        self.state_tx.subscribe()
    }

    /// Upload `content` as `file_name`, then poll its registration
    ///
    /// # Errors
    /// `PollerError::Busy` while a previous upload or poll is still running
    pub fn upload(&mut self, file_name: String, content: Vec<u8>) -> Result<(), PollerError> {
        if self.state_tx.borrow().is_active() {
            return Err(PollerError::Busy);
        }

        let own = self.retire();

        let mut poller = self.template.clone();
        poller.reset();
        poller.start_upload()?;
        self.state_tx.send_replace(poller.state().clone());

        let publisher = Publisher {
            state_tx: self.state_tx.clone(),
            generation: Arc::clone(&self.generation),
            own,
        };
        let api = Arc::clone(&self.api);
        self.task = Some(tokio::spawn(run(api, publisher, poller, file_name, content)));

        Ok(())
    }

    /// Cancel any running upload or poll and return to idle
    pub fn reset(&mut self) {
        self.retire();
        self.state_tx.send_replace(UploadWorkflowState::default());
    }

    /// Abort the current task and stop it from publishing; returns the new generation
    fn retire(&mut self) -> u64 {
        let own = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        own
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.reset();
    }
}

async fn run(
    api: Arc<dyn WorkflowsApi>,
    publisher: Publisher,
    mut poller: RegistrationPoller,
    file_name: String,
    content: Vec<u8>,
) {
    let uploaded = api
        .upload(&file_name, content)
        .await
        .map(UploadedWorkflow::from)
        .map_err(|e| e.to_string());

    let check_name = uploaded
        .as_ref()
        .map(|file| file.file_name.clone())
        .unwrap_or_else(|_| file_name.clone());

    let mut step = poller.finish_upload(Instant::now(), uploaded);
    publisher.publish(poller.state());

    loop {
        step = match step {
            Step::Done => break,
            Step::Wait(at) => {
                sleep_until(at).await;
                poller.tick(Instant::now(), None)
            }
            Step::Check => {
                let deadline = poller.deadline().unwrap_or_else(Instant::now);
                // The deadline wins over a check that never returns.
                let result = tokio::select! {
                    result = api.registration_status(&check_name) => Some(result),
                    _ = sleep_until(deadline) => None,
                };
                let next = poller.tick(Instant::now(), result);
                publisher.publish(poller.state());
                next
            }
        };
    }

    publisher.publish(poller.state());
}
