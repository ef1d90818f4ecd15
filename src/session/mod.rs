//! Conversation session: owns the transcript and the attached image, and runs
//! at most one model request at a time.
//!
//! Everything here is driven from the interactive thread. The worker only sees
//! an owned snapshot; its outcome comes back through [`SessionController::poll`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::SettingsStore;
use crate::conversation::{Conversation, Turn, SYSTEM_PROMPT};
use crate::geometry::{ImageRegion, Rect, Size};
use crate::imaging::{materialize, ImageError, ImageState, ModelImage};
use crate::inference::ChatBackend;
use crate::notification::Notice;
use crate::state::WorkerState;
use crate::storage::TempImageStore;
use crate::worker::{InferenceRequest, InferenceWorker, ModelOutcome, WorkerError, WorkerPoll};

const BUSY_MESSAGE: &str = "Please wait for the current processing to complete";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("please wait for the current processing to complete")]
    Busy,
    #[error("message is empty")]
    EmptyMessage,
    #[error("no image is loaded")]
    NoImage,
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Result of reconciling a finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Responded(Turn),
    /// The request failed; history is left as it was at submission.
    Failed(String),
}

struct PendingRequest {
    worker: InferenceWorker,
    image: Option<ModelImage>,
}

pub struct SessionController<S: SettingsStore> {
    conversation: Conversation,
    image: Option<ImageState>,
    display: Size,
    pending: Option<PendingRequest>,
    temp_images: TempImageStore,
    backend: Arc<dyn ChatBackend>,
    settings: S,
    notices: VecDeque<Notice>,
}

impl<S: SettingsStore> SessionController<S> {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        settings: S,
        temp_images: TempImageStore,
        display: Size,
    ) -> Self {
        Self {
            conversation: Conversation::new(),
            image: None,
            display,
            pending: None,
            temp_images,
            backend,
            settings,
            notices: VecDeque::new(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn image(&self) -> Option<&ImageState> {
        self.image.as_ref()
    }

    pub fn settings(&self) -> &S {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut S {
        &mut self.settings
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Path of the image attached to the in-flight request, if any.
    pub fn pending_image(&self) -> Option<&ModelImage> {
        self.pending.as_ref().and_then(|pending| pending.image.as_ref())
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    fn notify(&mut self, notice: Notice) {
        tracing::debug!(level = ?notice.level, text = %notice.text, "notice");
        self.notices.push_back(notice);
    }

    /// Appends the user turn and starts a model request for it.
    pub fn submit(&mut self, message: &str) -> SessionResult<()> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.pending.is_some() {
            self.notify(Notice::error(BUSY_MESSAGE));
            return Err(SessionError::Busy);
        }

        let rollback_len = self.conversation.len();
        self.conversation.push(Turn::user(message));

        let image = self.image_for_request();
        let request = InferenceRequest {
            system_prompt: self
                .settings
                .system_prompt()
                .unwrap_or_else(|| SYSTEM_PROMPT.to_string()),
            turns: self.conversation.snapshot(),
            image: image.as_ref().map(|image| image.path.clone()),
        };

        let mut worker = InferenceWorker::new(request);
        if let Err(err) = worker.start(Arc::clone(&self.backend)) {
            tracing::error!(%err, "failed to start inference worker");
            self.conversation.truncate(rollback_len);
            self.notify(Notice::error(format!("Error: Failed to send message: {err}")));
            return Err(err.into());
        }

        tracing::info!(
            turns = self.conversation.len(),
            image = ?image.as_ref().map(|image| &image.path),
            "request started"
        );
        self.pending = Some(PendingRequest { worker, image });
        self.notify(Notice::info("Processing your request..."));
        Ok(())
    }

    fn image_for_request(&mut self) -> Option<ModelImage> {
        let state = self.image.as_ref()?;
        match materialize(state, &self.temp_images) {
            Ok(image) => {
                if image.is_temporary {
                    self.temp_images.track(image.path.clone());
                }
                Some(image)
            }
            Err(err) => {
                tracing::warn!(%err, "crop unavailable; sending the full image");
                Some(ModelImage {
                    path: state.path().to_path_buf(),
                    is_temporary: false,
                })
            }
        }
    }

    /// Reconciles a finished request without blocking.
    pub fn poll(&mut self) -> Option<SessionUpdate> {
        let poll = self.pending.as_ref()?.worker.poll();
        self.reconcile(poll)
    }

    /// Like [`Self::poll`], waiting up to `timeout` for the outcome.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Option<SessionUpdate> {
        let poll = self.pending.as_ref()?.worker.poll_timeout(timeout);
        self.reconcile(poll)
    }

    fn reconcile(&mut self, poll: WorkerPoll) -> Option<SessionUpdate> {
        let outcome = match poll {
            WorkerPoll::Pending => return None,
            WorkerPoll::Outcome(outcome) => outcome,
            WorkerPoll::Finished => {
                ModelOutcome::Failed("model processing failed: worker stopped unexpectedly".into())
            }
        };

        let mut pending = self.pending.take()?;
        pending.worker.join();

        match outcome {
            ModelOutcome::Completed(text) => {
                let turn = self.conversation.push(Turn::model(text)).clone();
                tracing::info!(chars = turn.text.chars().count(), "response received");
                self.notify(Notice::success("Response received"));
                Some(SessionUpdate::Responded(turn))
            }
            ModelOutcome::Failed(reason) => {
                self.notify(Notice::error(format!("Error: {reason}")));
                Some(SessionUpdate::Failed(reason))
            }
        }
    }

    /// Cancels the in-flight request and waits for the worker to stop.
    ///
    /// Returns `false` when nothing was in flight, or when the worker had
    /// already finished: its outcome stays queued and the next
    /// [`Self::poll`] delivers it.
    pub fn cancel(&mut self) -> bool {
        let Some(mut pending) = self.pending.take() else {
            return false;
        };
        pending.worker.cancel();
        pending.worker.join();
        if pending.worker.state() != WorkerState::Cancelled {
            tracing::debug!(state = ?pending.worker.state(), "cancel arrived after the outcome");
            self.pending = Some(pending);
            return false;
        }
        self.notify(Notice::info("Processing cancelled"));
        true
    }

    fn cancel_and_join(&mut self) -> bool {
        let Some(mut pending) = self.pending.take() else {
            return false;
        };
        pending.worker.cancel();
        pending.worker.join();
        true
    }

    pub fn load_image(&mut self, path: impl Into<PathBuf>) -> SessionResult<()> {
        match ImageState::load(path, self.display) {
            Ok(state) => {
                let name = state.file_name();
                self.image = Some(state);
                self.notify(Notice::success(format!("Selected image: {name}")));
                Ok(())
            }
            Err(err) => {
                self.notify(Notice::error(format!("Error: {err}")));
                Err(err.into())
            }
        }
    }

    pub fn clear_image(&mut self) {
        if self.image.take().is_some() {
            self.notify(Notice::info("Image cleared"));
        }
    }

    pub fn set_display_size(&mut self, display: Size) {
        self.display = display;
        if let Some(image) = self.image.as_mut() {
            image.set_display_size(display);
        }
    }

    /// Records a region of interest in preview coordinates. Returns the
    /// region it covers in the original image, if any.
    pub fn select_region(&mut self, selection: Rect) -> SessionResult<Option<ImageRegion>> {
        let image = self.image.as_mut().ok_or(SessionError::NoImage)?;
        image.set_selection(selection);
        Ok(image.selected_region())
    }

    pub fn clear_selection(&mut self) {
        if let Some(image) = self.image.as_mut() {
            image.clear_selection();
        }
    }

    /// Appends the tutorial as a model turn when enabled or forced.
    pub fn show_tutorial(&mut self, force: bool) -> bool {
        if !force && !self.settings.show_tutorial() {
            return false;
        }
        let text = self.settings.tutorial_message();
        self.conversation.push(Turn::unstamped_model(text));
        true
    }

    pub fn clear_history(&mut self) {
        self.cancel_and_join();
        self.conversation.clear();
        self.image = None;
        self.temp_images.cleanup();
        self.notify(Notice::info("Chat history cleared"));
    }

    /// Stops any in-flight request and removes temporary crops.
    pub fn shutdown(&mut self) {
        if self.cancel_and_join() {
            tracing::info!("cancelled in-flight request on shutdown");
        }
        let removed = self.temp_images.cleanup();
        tracing::debug!(removed, "temporary images cleaned up");
    }
}

impl<S: SettingsStore> Drop for SessionController<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
