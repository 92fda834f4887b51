//! Upload orchestrator.
//!
//! Owns the configuration snapshot and every task created from a file
//! selection, and drives each task through
//! `Pending → TokenAcquiring → Planning → Transferring → {Succeeded | Failed | Cancelled}`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use skyload_protocol::{TaskState, UploadResponse};
use skyload_transfer::{ChunkSpec, TransferError, plan_chunks};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::UploaderConfig;
use crate::error::{ConfigError, UploadError, UploadFailure};
use crate::interceptor::{Interceptor, InterceptorChain, TracingInterceptor};
use crate::listener::{NoopListener, UploadListener};
use crate::retry::{DefaultRetryPolicy, RetryPolicy};
use crate::scheduler::{ScheduleOutcome, SharedTask, TransferScheduler};
use crate::token::{TaskToken, TokenProvider, TokenSource};
use crate::transport::Transport;
use crate::types::{TaskId, TaskOutcome, UploadFile, UploadResult, UploadTask};

/// Collaborators handed over by the builder.
pub(crate) struct UploaderParts {
    pub transport: Arc<dyn Transport>,
    pub token_source: Option<Arc<dyn TokenSource>>,
    pub listener: Option<Arc<dyn UploadListener>>,
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub interceptors: Vec<Arc<dyn Interceptor>>,
}

struct TaskEntry {
    file: Arc<UploadFile>,
    snapshot: SharedTask,
    cancel: CancellationToken,
}

/// A task taken out of `Pending` by exactly one caller.
struct Claim {
    id: TaskId,
    file: Arc<UploadFile>,
    snapshot: SharedTask,
    cancel: CancellationToken,
}

/// Why a task stopped before every chunk succeeded.
enum Stop {
    Failed {
        chunk: Option<usize>,
        error: UploadError,
    },
    Cancelled,
}

struct Inner {
    config: UploaderConfig,
    transport: Arc<dyn Transport>,
    tokens: Option<Arc<TokenProvider>>,
    chain: InterceptorChain,
    policy: Arc<dyn RetryPolicy>,
    listener: Arc<dyn UploadListener>,
    tasks: Mutex<BTreeMap<TaskId, TaskEntry>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

/// Turns selected files into upload tasks and runs them.
///
/// Cheap to clone; clones share tasks and configuration.
#[derive(Clone)]
pub struct Uploader {
    inner: Arc<Inner>,
}

impl Uploader {
    pub(crate) fn from_parts(config: UploaderConfig, parts: UploaderParts) -> Self {
        let mut interceptors = parts.interceptors;
        if config.debug {
            interceptors.insert(0, Arc::new(TracingInterceptor));
        }
        let policy = parts.retry_policy.unwrap_or_else(|| {
            Arc::new(DefaultRetryPolicy::new(config.retry, config.backoff.clone()))
        });
        let tokens = parts
            .token_source
            .map(|source| Arc::new(TokenProvider::new(source, config.token_share)));

        Self {
            inner: Arc::new(Inner {
                transport: parts.transport,
                tokens,
                chain: InterceptorChain::new(interceptors),
                policy,
                listener: parts.listener.unwrap_or_else(|| Arc::new(NoopListener)),
                tasks: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.inner.config
    }

    /// The token provider, if a token source was configured.
    pub fn token_provider(&self) -> Option<&Arc<TokenProvider>> {
        self.inner.tokens.as_ref()
    }

    /// Registers the accepted files of a selection as `Pending` tasks.
    ///
    /// Files rejected by the accept patterns are reported through
    /// `on_rejected`. With `multiple` off only the first accepted file is
    /// kept. With `auto` on, the new tasks are started in the background,
    /// which requires a Tokio runtime.
    pub fn select(&self, files: impl IntoIterator<Item = UploadFile>) -> Vec<TaskId> {
        let config = &self.inner.config;
        let mut ids = Vec::new();

        for file in files {
            if !config.accept.accepts(&file) {
                let reason = format!("type not accepted by [{}]", config.accept.raw().join(", "));
                warn!(file = %file.name, mime = %file.mime_type, "{reason}");
                self.inner.listener.on_rejected(&file, &reason);
                continue;
            }
            if !config.multiple && !ids.is_empty() {
                let reason = "only one file may be selected";
                warn!(file = %file.name, "{reason}");
                self.inner.listener.on_rejected(&file, reason);
                continue;
            }
            ids.push(self.register(file));
        }

        if config.auto {
            for id in &ids {
                self.start(*id);
            }
        }
        ids
    }

    fn register(&self, file: UploadFile) -> TaskId {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let snapshot = UploadTask {
            id,
            file_name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size: file.size,
            state: TaskState::Pending,
            chunks: Vec::new(),
        };
        info!(task = %id, file = %file.name, size = file.size, "task registered");
        self.inner.tasks.lock().unwrap().insert(
            id,
            TaskEntry {
                file: Arc::new(file),
                snapshot: Arc::new(Mutex::new(snapshot)),
                cancel: self.inner.cancel.child_token(),
            },
        );
        id
    }

    /// Starts a `Pending` task in the background.
    ///
    /// Returns `None` if the task does not exist or has already been started.
    pub fn start(&self, id: TaskId) -> Option<JoinHandle<TaskOutcome>> {
        let claim = self.claim(id)?;
        let uploader = self.clone();
        Some(tokio::spawn(async move { uploader.execute(claim).await }))
    }

    /// Starts every `Pending` task.
    pub fn start_all(&self) -> Vec<JoinHandle<TaskOutcome>> {
        let pending: Vec<TaskId> = {
            let tasks = self.inner.tasks.lock().unwrap();
            tasks
                .iter()
                .filter(|(_, entry)| entry.snapshot.lock().unwrap().state == TaskState::Pending)
                .map(|(id, _)| *id)
                .collect()
        };
        pending.into_iter().filter_map(|id| self.start(id)).collect()
    }

    /// Runs a `Pending` task to completion on the current task.
    ///
    /// Returns `None` if the task does not exist or has already been started.
    pub async fn run(&self, id: TaskId) -> Option<TaskOutcome> {
        let claim = self.claim(id)?;
        Some(self.execute(claim).await)
    }

    /// Requests cancellation of a task.
    ///
    /// A task that has not started yet is cancelled immediately. A running
    /// task stops at its next suspension point. Returns `false` if the task
    /// is unknown or already finished.
    pub fn cancel(&self, id: TaskId) -> bool {
        let (unstarted, cancel) = {
            let tasks = self.inner.tasks.lock().unwrap();
            let Some(entry) = tasks.get(&id) else {
                return false;
            };
            let mut task = entry.snapshot.lock().unwrap();
            if task.state.is_terminal() {
                return false;
            }
            let unstarted = if task.state == TaskState::Pending {
                task.state = TaskState::Cancelled;
                Some(task.clone())
            } else {
                None
            };
            (unstarted, entry.cancel.clone())
        };

        cancel.cancel();
        if let Some(task) = unstarted {
            info!(task = %id, "task cancelled before start");
            self.inner.listener.on_cancel(&task);
        }
        true
    }

    /// Cancels every unfinished task.
    pub fn cancel_all(&self) {
        let ids: Vec<TaskId> = self.inner.tasks.lock().unwrap().keys().copied().collect();
        for id in ids {
            self.cancel(id);
        }
    }

    /// Snapshot of one task.
    pub fn task(&self, id: TaskId) -> Option<UploadTask> {
        let tasks = self.inner.tasks.lock().unwrap();
        tasks.get(&id).map(|e| e.snapshot.lock().unwrap().clone())
    }

    /// Snapshots of all tasks, ordered by id.
    pub fn tasks(&self) -> Vec<UploadTask> {
        let tasks = self.inner.tasks.lock().unwrap();
        tasks
            .values()
            .map(|e| e.snapshot.lock().unwrap().clone())
            .collect()
    }

    /// Moves a task out of `Pending`. Only one caller can win.
    fn claim(&self, id: TaskId) -> Option<Claim> {
        let tasks = self.inner.tasks.lock().unwrap();
        let entry = tasks.get(&id)?;
        let mut task = entry.snapshot.lock().unwrap();
        if task.state != TaskState::Pending {
            return None;
        }
        task.state = TaskState::TokenAcquiring;
        Some(Claim {
            id,
            file: Arc::clone(&entry.file),
            snapshot: Arc::clone(&entry.snapshot),
            cancel: entry.cancel.clone(),
        })
    }

    async fn execute(&self, claim: Claim) -> TaskOutcome {
        let started = claim.snapshot.lock().unwrap().clone();
        info!(task = %claim.id, file = %claim.file.name, size = claim.file.size, "upload started");
        self.inner.listener.on_start(&started);

        let result = self.drive(&claim).await;
        self.finish(&claim, result)
    }

    async fn drive(&self, claim: &Claim) -> Result<Vec<UploadResponse>, Stop> {
        let inner = &self.inner;
        let token = TaskToken::new(inner.tokens.clone());

        if claim.cancel.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        self.acquire_token(claim, &token).await?;

        if claim.cancel.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        transition(&claim.snapshot, TaskState::Planning);
        let chunks = self.plan(&claim.file).map_err(|error| Stop::Failed { chunk: None, error })?;

        if claim.cancel.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        transition(&claim.snapshot, TaskState::Transferring);
        let transform = if claim.file.is_image() {
            inner.config.image_transform()
        } else {
            None
        };
        let scheduler = TransferScheduler {
            file: &claim.file,
            task: &claim.snapshot,
            token: &token,
            transport: inner.transport.as_ref(),
            chain: &inner.chain,
            policy: inner.policy.as_ref(),
            listener: inner.listener.as_ref(),
            cancel: &claim.cancel,
            max_concurrency: inner.config.max_concurrency,
            transform,
        };

        match scheduler.run(chunks).await {
            ScheduleOutcome::Completed(responses) => Ok(responses),
            ScheduleOutcome::Failed { chunk, error } => Err(Stop::Failed {
                chunk: Some(chunk),
                error,
            }),
            ScheduleOutcome::Cancelled => Err(Stop::Cancelled),
        }
    }

    /// Fetches the task's token up front, retrying per the retry policy.
    async fn acquire_token(&self, claim: &Claim, token: &TaskToken) -> Result<(), Stop> {
        let policy = self.inner.policy.as_ref();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let fetched = tokio::select! {
                biased;
                _ = claim.cancel.cancelled() => return Err(Stop::Cancelled),
                fetched = token.get() => fetched,
            };
            let error = match fetched {
                Ok(_) => return Ok(()),
                Err(e) => UploadError::Token(e),
            };
            if !policy.should_retry(attempt, &error) {
                return Err(Stop::Failed { chunk: None, error });
            }
            let delay = policy.backoff_delay(attempt);
            warn!(task = %claim.id, attempt, error = %error, "token fetch failed, retrying");
            tokio::select! {
                biased;
                _ = claim.cancel.cancelled() => return Err(Stop::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn plan(&self, file: &UploadFile) -> Result<Vec<ChunkSpec>, UploadError> {
        let config = &self.inner.config;
        plan_chunks(file.size, config.chunk_size, config.chunk).map_err(|e| match e {
            TransferError::InvalidChunkSize(size) => ConfigError::InvalidChunkSize(size).into(),
            other => UploadError::Transfer(other),
        })
    }

    /// Records the terminal state and fires exactly one terminal callback.
    fn finish(&self, claim: &Claim, result: Result<Vec<UploadResponse>, Stop>) -> TaskOutcome {
        let listener = self.inner.listener.as_ref();
        match result {
            Ok(responses) => {
                let task = transition(&claim.snapshot, TaskState::Succeeded);
                let result = UploadResult {
                    task_id: claim.id,
                    file_name: claim.file.name.clone(),
                    bytes: claim.file.size,
                    responses,
                };
                info!(
                    task = %claim.id,
                    file = %claim.file.name,
                    bytes = result.bytes,
                    "upload succeeded"
                );
                listener.on_success(&task, &result);
                TaskOutcome::Succeeded(result)
            }
            Err(Stop::Failed { chunk, error }) => {
                let task = transition(&claim.snapshot, TaskState::Failed);
                let failure = UploadFailure {
                    task_id: claim.id,
                    file_name: claim.file.name.clone(),
                    chunk,
                    error,
                };
                error!(task = %claim.id, chunk = ?chunk, error = %failure.error, "upload failed");
                listener.on_failure(&task, &failure);
                TaskOutcome::Failed(failure)
            }
            Err(Stop::Cancelled) => {
                let task = transition(&claim.snapshot, TaskState::Cancelled);
                info!(task = %claim.id, "upload cancelled");
                listener.on_cancel(&task);
                TaskOutcome::Cancelled
            }
        }
    }
}

/// Moves a task to `state` unless it is already terminal, returning the
/// resulting snapshot.
fn transition(snapshot: &SharedTask, state: TaskState) -> UploadTask {
    let mut task = snapshot.lock().unwrap();
    if !task.state.is_terminal() {
        task.state = state;
    }
    task.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploaderBuilder;
    use crate::error::TokenError;
    use crate::token::{StaticToken, Token, sync_token_fn};
    use crate::transport::TransportFuture;
    use skyload_protocol::UploadRequest;
    use std::time::Duration;

    /// Answers 200 and records every request.
    #[derive(Default)]
    struct RecordingTransport {
        requests: Mutex<Vec<UploadRequest>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, request: UploadRequest) -> TransportFuture<'_> {
            self.requests.lock().unwrap().push(request);
            Box::pin(async { Ok(UploadResponse::empty(200)) })
        }
    }

    #[derive(Default)]
    struct Calls {
        log: Mutex<Vec<String>>,
    }

    impl UploadListener for Calls {
        fn on_rejected(&self, file: &UploadFile, _reason: &str) {
            self.log.lock().unwrap().push(format!("rejected:{}", file.name));
        }
        fn on_start(&self, task: &UploadTask) {
            self.log.lock().unwrap().push(format!("start:{}", task.file_name));
        }
        fn on_success(&self, task: &UploadTask, _result: &UploadResult) {
            self.log.lock().unwrap().push(format!("success:{}", task.file_name));
        }
        fn on_failure(&self, task: &UploadTask, _failure: &UploadFailure) {
            self.log.lock().unwrap().push(format!("failure:{}", task.file_name));
        }
        fn on_cancel(&self, task: &UploadTask) {
            self.log.lock().unwrap().push(format!("cancel:{}", task.file_name));
        }
    }

    fn file(name: &str, mime: &str, len: usize) -> UploadFile {
        UploadFile::from_bytes(name, mime, vec![0u8; len])
    }

    #[tokio::test]
    async fn select_filters_and_registers_pending_tasks() {
        let calls = Arc::new(Calls::default());
        let uploader = UploaderBuilder::new()
            .transport(Arc::new(RecordingTransport::default()))
            .listener(calls.clone())
            .accept([".png", "video/*"])
            .auto(false)
            .build()
            .unwrap();

        let ids = uploader.select([
            file("clip.mov", "video/quicktime", 4),
            file("doc.pdf", "application/pdf", 4),
            file("shot.PNG", "", 4),
        ]);

        assert_eq!(ids.len(), 2);
        let tasks = uploader.tasks();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.state == TaskState::Pending));
        assert_eq!(*calls.log.lock().unwrap(), vec!["rejected:doc.pdf"]);
    }

    #[tokio::test]
    async fn single_selection_keeps_first_accepted_file() {
        let uploader = UploaderBuilder::new()
            .transport(Arc::new(RecordingTransport::default()))
            .multiple(false)
            .auto(false)
            .build()
            .unwrap();

        let ids = uploader.select([file("a.txt", "text/plain", 1), file("b.txt", "text/plain", 1)]);
        assert_eq!(ids.len(), 1);
        assert_eq!(uploader.task(ids[0]).unwrap().file_name, "a.txt");
    }

    #[tokio::test]
    async fn run_succeeds_and_refuses_second_start() {
        let transport = Arc::new(RecordingTransport::default());
        let calls = Arc::new(Calls::default());
        let uploader = UploaderBuilder::new()
            .transport(transport.clone())
            .listener(calls.clone())
            .token_source(Arc::new(StaticToken(Token::new("abc"))))
            .auto(false)
            .build()
            .unwrap();

        let id = uploader.select([file("a.bin", "", 10)])[0];
        let outcome = uploader.run(id).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(uploader.task(id).unwrap().state, TaskState::Succeeded);
        assert!(uploader.run(id).await.is_none());
        assert!(uploader.start(id).is_none());
        assert!(!uploader.cancel(id));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header("Authorization"), Some("Bearer abc"));
        assert_eq!(*calls.log.lock().unwrap(), vec!["start:a.bin", "success:a.bin"]);
    }

    #[tokio::test]
    async fn zero_chunk_size_fails_at_plan_time() {
        let transport = Arc::new(RecordingTransport::default());
        let uploader = UploaderBuilder::new()
            .transport(transport.clone())
            .chunk(true)
            .chunk_size(0)
            .auto(false)
            .build()
            .unwrap();

        let id = uploader.select([file("a.bin", "", 10)])[0];
        match uploader.run(id).await.unwrap() {
            TaskOutcome::Failed(failure) => {
                assert!(matches!(
                    failure.error,
                    UploadError::Config(ConfigError::InvalidChunkSize(0))
                ));
                assert_eq!(failure.chunk, None);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn token_failure_is_retried_then_terminal() {
        let transport = Arc::new(RecordingTransport::default());
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = attempts.clone();
        let uploader = UploaderBuilder::new()
            .transport(transport.clone())
            .token_source(Arc::new(sync_token_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TokenError::new("denied"))
            })))
            .retry(2)
            .auto(false)
            .build()
            .unwrap();

        let id = uploader.select([file("a.bin", "", 10)])[0];
        let outcome = uploader.run(id).await.unwrap();

        assert_eq!(outcome.state(), TaskState::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_pending_task_notifies_once() {
        let calls = Arc::new(Calls::default());
        let uploader = UploaderBuilder::new()
            .transport(Arc::new(RecordingTransport::default()))
            .listener(calls.clone())
            .auto(false)
            .build()
            .unwrap();

        let id = uploader.select([file("a.bin", "", 1)])[0];
        assert!(uploader.cancel(id));
        assert!(!uploader.cancel(id));
        assert!(uploader.run(id).await.is_none());
        assert_eq!(uploader.task(id).unwrap().state, TaskState::Cancelled);
        assert_eq!(*calls.log.lock().unwrap(), vec!["cancel:a.bin"]);
    }

    #[tokio::test]
    async fn image_requests_carry_transform() {
        let transport = Arc::new(RecordingTransport::default());
        let uploader = UploaderBuilder::new()
            .transport(transport.clone())
            .compress(75)
            .crop([0, 0, 64, 64])
            .auto(false)
            .build()
            .unwrap();

        let ids = uploader.select([file("a.png", "image/png", 4), file("a.txt", "text/plain", 4)]);
        for handle in uploader.start_all() {
            assert!(handle.await.unwrap().is_success());
        }
        assert_eq!(ids.len(), 2);

        let requests = transport.requests.lock().unwrap();
        let image = requests.iter().find(|r| r.meta.file_name == "a.png").unwrap();
        let transform = image.meta.transform.as_ref().unwrap();
        assert_eq!(transform.quality, 75);
        assert_eq!(transform.crop.unwrap().width, 64);
        let text = requests.iter().find(|r| r.meta.file_name == "a.txt").unwrap();
        assert!(text.meta.transform.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_start_runs_in_background() {
        let transport = Arc::new(RecordingTransport::default());
        let uploader = UploaderBuilder::new()
            .transport(transport.clone())
            .build()
            .unwrap();

        let id = uploader.select([file("a.bin", "", 3)])[0];
        for _ in 0..10 {
            if uploader.task(id).unwrap().state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(uploader.task(id).unwrap().state, TaskState::Succeeded);
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
    }
}
