//! Runs one model request off the interactive thread.
//!
//! A worker is single-use: it is created `Idle`, started once, and ends in
//! `Completed`, `Failed` or `Cancelled`. At most one [`ModelOutcome`] is ever
//! delivered, through a single-slot channel drained by the owning thread.
//! Cancellation is cooperative; an in-flight HTTP call is not aborted, its
//! result is just dropped.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use crate::conversation::{encode, encode_image_base64, Turn};
use crate::inference::{error_chain, ChatBackend};
use crate::state::{StateError, StateMachine, WorkerEvent, WorkerState};

const WORKER_THREAD_NAME: &str = "inference-worker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOutcome {
    Completed(String),
    Failed(String),
}

/// Immutable input handed to the worker thread.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub system_prompt: String,
    pub turns: Vec<Turn>,
    pub image: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerPoll {
    Pending,
    Outcome(ModelOutcome),
    /// The worker ended without an outcome (it was cancelled).
    Finished,
}

#[derive(Debug, Default)]
struct WorkerShared {
    cancelled: AtomicBool,
    machine: Mutex<StateMachine>,
}

impl WorkerShared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn state(&self) -> WorkerState {
        self.machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    fn transition(&self, event: WorkerEvent) -> Result<WorkerState, StateError> {
        self.machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transition(event)
    }
}

pub struct InferenceWorker {
    shared: Arc<WorkerShared>,
    request: Option<InferenceRequest>,
    outcome_tx: Option<SyncSender<ModelOutcome>>,
    outcome_rx: Receiver<ModelOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl InferenceWorker {
    pub fn new(request: InferenceRequest) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::sync_channel(1);
        Self {
            shared: Arc::new(WorkerShared::default()),
            request: Some(request),
            outcome_tx: Some(outcome_tx),
            outcome_rx,
            handle: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    pub fn start(&mut self, backend: Arc<dyn ChatBackend>) -> Result<(), WorkerError> {
        self.shared.transition(WorkerEvent::Start)?;
        let (Some(request), Some(outcome_tx)) = (self.request.take(), self.outcome_tx.take())
        else {
            return Err(WorkerError::State(StateError::InvalidStateTransition {
                from: self.state(),
                event: WorkerEvent::Start,
            }));
        };

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(request, backend.as_ref(), &shared, outcome_tx));
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                let _ = self.shared.transition(WorkerEvent::Fail);
                Err(WorkerError::Spawn(err))
            }
        }
    }

    /// Requests cancellation. Returns `false` when the worker had already
    /// reached a terminal state, in which case nothing changes.
    pub fn cancel(&self) -> bool {
        let state = self.state();
        if state.is_terminal() {
            tracing::debug!(?state, "cancel ignored for finished worker");
            return false;
        }
        self.shared.cancelled.store(true, Ordering::SeqCst);
        if state == WorkerState::Idle {
            let _ = self.shared.transition(WorkerEvent::Cancel);
        }
        tracing::info!("inference cancellation requested");
        true
    }

    pub fn poll(&self) -> WorkerPoll {
        match self.outcome_rx.try_recv() {
            Ok(outcome) => WorkerPoll::Outcome(outcome),
            Err(TryRecvError::Empty) => self.pending_or_finished(),
            Err(TryRecvError::Disconnected) => WorkerPoll::Finished,
        }
    }

    pub fn poll_timeout(&self, timeout: Duration) -> WorkerPoll {
        match self.outcome_rx.recv_timeout(timeout) {
            Ok(outcome) => WorkerPoll::Outcome(outcome),
            Err(RecvTimeoutError::Timeout) => self.pending_or_finished(),
            Err(RecvTimeoutError::Disconnected) => WorkerPoll::Finished,
        }
    }

    fn pending_or_finished(&self) -> WorkerPoll {
        // Never started and cancelled: the sender is still held here.
        if self.handle.is_none() && self.state().is_terminal() {
            WorkerPoll::Finished
        } else {
            WorkerPoll::Pending
        }
    }

    /// Blocks until the worker thread has exited.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("inference worker thread panicked");
                let _ = self.shared.transition(WorkerEvent::Fail);
            }
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
            self.join();
        }
    }
}

fn run(
    request: InferenceRequest,
    backend: &dyn ChatBackend,
    shared: &WorkerShared,
    outcome_tx: SyncSender<ModelOutcome>,
) {
    match execute(&request, backend, &shared.cancelled, |path| std::fs::read(path)) {
        Some(outcome) => {
            let event = match &outcome {
                ModelOutcome::Completed(_) => WorkerEvent::Complete,
                ModelOutcome::Failed(reason) => {
                    tracing::warn!(%reason, "inference failed");
                    WorkerEvent::Fail
                }
            };
            if shared.transition(event).is_ok() {
                let _ = outcome_tx.try_send(outcome);
            }
        }
        None => {
            tracing::info!("inference cancelled");
            let _ = shared.transition(WorkerEvent::Cancel);
        }
    }
}

/// `None` means the request was cancelled and nothing should be reported.
fn execute(
    request: &InferenceRequest,
    backend: &dyn ChatBackend,
    cancelled: &AtomicBool,
    read_image: impl Fn(&Path) -> io::Result<Vec<u8>>,
) -> Option<ModelOutcome> {
    let is_cancelled = || cancelled.load(Ordering::SeqCst);

    if is_cancelled() {
        return None;
    }

    let image = match &request.image {
        Some(path) => {
            let bytes = match read_image(path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    return Some(ModelOutcome::Failed(format!(
                        "image processing failed: {}: {}",
                        path.display(),
                        error_chain(&err)
                    )));
                }
            };
            if is_cancelled() {
                return None;
            }
            Some(encode_image_base64(&bytes))
        }
        None => None,
    };

    if is_cancelled() {
        return None;
    }

    let messages = match encode(&request.system_prompt, &request.turns, image) {
        Ok(messages) => messages,
        Err(err) => return Some(ModelOutcome::Failed(format!("model processing failed: {err}"))),
    };

    let result = backend.chat(&messages);
    if is_cancelled() {
        return None;
    }
    Some(match result {
        Ok(text) => ModelOutcome::Completed(text),
        Err(err) => ModelOutcome::Failed(format!("model processing failed: {}", error_chain(&err))),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::Mutex;

    use crate::conversation::ChatMessage;
    use crate::inference::{ChatBackend, InferenceError, InferenceResult};

    /// Backend whose replies are fed by the test, one per call.
    pub(crate) struct ScriptedBackend {
        entered_tx: Mutex<Sender<Vec<ChatMessage>>>,
        reply_rx: Mutex<Receiver<Result<String, String>>>,
    }

    pub(crate) struct BackendControl {
        pub(crate) entered: Receiver<Vec<ChatMessage>>,
        pub(crate) reply: Sender<Result<String, String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new() -> (Self, BackendControl) {
            let (entered_tx, entered) = mpsc::channel();
            let (reply, reply_rx) = mpsc::channel();
            (
                Self {
                    entered_tx: Mutex::new(entered_tx),
                    reply_rx: Mutex::new(reply_rx),
                },
                BackendControl { entered, reply },
            )
        }
    }

    impl ChatBackend for ScriptedBackend {
        fn chat(&self, messages: &[ChatMessage]) -> InferenceResult<String> {
            let _ = self.entered_tx.lock().unwrap().send(messages.to_vec());
            let reply = self
                .reply_rx
                .lock()
                .unwrap()
                .recv()
                .unwrap_or_else(|_| Err("backend dropped".to_string()));
            reply.map_err(|message| InferenceError::Status {
                status: 500,
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedBackend;
    use super::*;
    use crate::conversation::{Role, SYSTEM_PROMPT};

    const WAIT: Duration = Duration::from_secs(5);

    fn request(image: Option<PathBuf>) -> InferenceRequest {
        InferenceRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            turns: vec![Turn::user("what is this?")],
            image,
        }
    }

    #[test]
    fn completes_with_model_text() {
        let (backend, control) = ScriptedBackend::new();
        let mut worker = InferenceWorker::new(request(None));
        worker.start(Arc::new(backend)).unwrap();

        let messages = control.entered.recv_timeout(WAIT).unwrap();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "what is this?");
        control.reply.send(Ok("a cat".to_string())).unwrap();

        assert_eq!(
            worker.poll_timeout(WAIT),
            WorkerPoll::Outcome(ModelOutcome::Completed("a cat".to_string()))
        );
        worker.join();
        assert_eq!(worker.state(), WorkerState::Completed);
        assert_eq!(worker.poll(), WorkerPoll::Finished);
    }

    #[test]
    fn attaches_base64_image_to_last_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.png");
        std::fs::write(&path, b"img").unwrap();

        let (backend, control) = ScriptedBackend::new();
        let mut worker = InferenceWorker::new(request(Some(path)));
        worker.start(Arc::new(backend)).unwrap();

        let messages = control.entered.recv_timeout(WAIT).unwrap();
        assert_eq!(messages.last().unwrap().images, ["aW1n"]);
        control.reply.send(Ok("ok".to_string())).unwrap();
        worker.join();
    }

    #[test]
    fn cancel_before_start_reports_nothing() {
        let (backend, control) = ScriptedBackend::new();
        let mut worker = InferenceWorker::new(request(None));
        assert!(worker.cancel());
        assert_eq!(worker.state(), WorkerState::Cancelled);
        assert!(worker.start(Arc::new(backend)).is_err());
        assert_eq!(worker.poll(), WorkerPoll::Finished);
        assert!(control.entered.try_recv().is_err());
    }

    #[test]
    fn cancel_during_call_suppresses_the_outcome() {
        let (backend, control) = ScriptedBackend::new();
        let mut worker = InferenceWorker::new(request(None));
        worker.start(Arc::new(backend)).unwrap();
        control.entered.recv_timeout(WAIT).unwrap();

        assert!(worker.cancel());
        control.reply.send(Ok("too late".to_string())).unwrap();
        worker.join();

        assert_eq!(worker.state(), WorkerState::Cancelled);
        assert_eq!(worker.poll(), WorkerPoll::Finished);
    }

    #[test]
    fn unreadable_image_fails_before_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, control) = ScriptedBackend::new();
        let mut worker = InferenceWorker::new(request(Some(dir.path().join("missing.png"))));
        worker.start(Arc::new(backend)).unwrap();

        match worker.poll_timeout(WAIT) {
            WorkerPoll::Outcome(ModelOutcome::Failed(reason)) => {
                assert!(reason.starts_with("image processing failed: "), "{reason}");
                assert!(reason.contains("missing.png"), "{reason}");
            }
            other => panic!("unexpected poll result: {other:?}"),
        }
        worker.join();
        assert_eq!(worker.state(), WorkerState::Failed);
        assert!(control.entered.try_recv().is_err());
    }

    #[test]
    fn read_failure_is_reported_even_if_cancelled_during_the_read() {
        let (backend, control) = ScriptedBackend::new();
        let cancelled = AtomicBool::new(false);

        let outcome = execute(
            &request(Some(PathBuf::from("gone.png"))),
            &backend,
            &cancelled,
            |_| {
                cancelled.store(true, Ordering::SeqCst);
                Err(io::Error::new(io::ErrorKind::NotFound, "no such file"))
            },
        );

        match outcome {
            Some(ModelOutcome::Failed(reason)) => {
                assert!(reason.starts_with("image processing failed: "), "{reason}");
                assert!(reason.contains("no such file"), "{reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(control.entered.try_recv().is_err());
    }

    #[test]
    fn cancel_after_image_read_ends_silently() {
        let (backend, control) = ScriptedBackend::new();
        let cancelled = AtomicBool::new(false);

        let outcome = execute(
            &request(Some(PathBuf::from("pic.png"))),
            &backend,
            &cancelled,
            |_| {
                cancelled.store(true, Ordering::SeqCst);
                Ok(b"img".to_vec())
            },
        );

        assert_eq!(outcome, None);
        assert!(control.entered.try_recv().is_err());
    }

    #[test]
    fn backend_error_becomes_model_failure() {
        let (backend, control) = ScriptedBackend::new();
        let mut worker = InferenceWorker::new(request(None));
        worker.start(Arc::new(backend)).unwrap();
        control.entered.recv_timeout(WAIT).unwrap();
        control
            .reply
            .send(Err("connection refused".to_string()))
            .unwrap();

        match worker.poll_timeout(WAIT) {
            WorkerPoll::Outcome(ModelOutcome::Failed(reason)) => {
                assert!(reason.starts_with("model processing failed: "), "{reason}");
                assert!(reason.contains("connection refused"), "{reason}");
            }
            other => panic!("unexpected poll result: {other:?}"),
        }
        worker.join();
    }

    #[test]
    fn cancel_after_completion_is_a_no_op() {
        let (backend, control) = ScriptedBackend::new();
        let mut worker = InferenceWorker::new(request(None));
        worker.start(Arc::new(backend)).unwrap();
        control.entered.recv_timeout(WAIT).unwrap();
        control.reply.send(Ok("done".to_string())).unwrap();
        assert!(matches!(worker.poll_timeout(WAIT), WorkerPoll::Outcome(_)));
        worker.join();

        assert!(!worker.cancel());
        assert!(!worker.is_cancelled());
        assert_eq!(worker.state(), WorkerState::Completed);
    }

    #[test]
    fn worker_is_single_use() {
        let (backend, control) = ScriptedBackend::new();
        let backend: Arc<dyn ChatBackend> = Arc::new(backend);
        let mut worker = InferenceWorker::new(request(None));
        worker.start(Arc::clone(&backend)).unwrap();
        assert!(matches!(
            worker.start(backend),
            Err(WorkerError::State(StateError::InvalidStateTransition { .. }))
        ));
        control.entered.recv_timeout(WAIT).unwrap();
        control.reply.send(Ok("done".to_string())).unwrap();
        worker.join();
    }
}
