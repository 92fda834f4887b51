//! Transfer scheduler: drives every chunk of one task to completion.
//!
//! One scheduler future owns all in-flight attempts and backoff timers of a
//! task in a `FuturesUnordered`, so chunk transfers overlap while listener
//! callbacks for the task are still issued one at a time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use skyload_protocol::{ChunkMeta, ChunkState, ImageTransform, UploadRequest, UploadResponse};
use skyload_transfer::{ChunkSpec, checksum_bytes};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::UploadError;
use crate::interceptor::InterceptorChain;
use crate::listener::UploadListener;
use crate::retry::RetryPolicy;
use crate::token::{TaskToken, Token};
use crate::transport::Transport;
use crate::types::{ChunkStatus, UploadFile, UploadTask};

/// Task snapshot shared between a running scheduler and the uploader.
pub(crate) type SharedTask = Arc<Mutex<UploadTask>>;

/// How the transfer phase of a task ended.
#[derive(Debug)]
pub(crate) enum ScheduleOutcome {
    /// Every chunk succeeded. Responses are ordered by chunk index.
    Completed(Vec<UploadResponse>),
    Failed { chunk: usize, error: UploadError },
    Cancelled,
}

enum Event {
    Settled {
        index: usize,
        token: Option<Token>,
        result: Result<UploadResponse, UploadError>,
    },
    BackoffElapsed {
        index: usize,
    },
}

/// Collaborators a scheduler borrows for the duration of one task.
pub(crate) struct TransferScheduler<'a> {
    pub file: &'a UploadFile,
    pub task: &'a SharedTask,
    pub token: &'a TaskToken,
    pub transport: &'a dyn Transport,
    pub chain: &'a InterceptorChain,
    pub policy: &'a dyn RetryPolicy,
    pub listener: &'a dyn UploadListener,
    pub cancel: &'a CancellationToken,
    pub max_concurrency: usize,
    pub transform: Option<ImageTransform>,
}

impl TransferScheduler<'_> {
    /// Transfers `chunks`, keeping at most `max_concurrency` requests in flight.
    ///
    /// After a terminal chunk failure no new chunk is dispatched; requests
    /// already in flight are allowed to settle. Cancellation drops every
    /// outstanding attempt without observing its result.
    pub(crate) async fn run(&self, chunks: Vec<ChunkSpec>) -> ScheduleOutcome {
        let chunk_count = chunks.len();
        let limit = self.max_concurrency.max(1);

        self.update(|task| {
            task.chunks = chunks
                .iter()
                .map(|spec| ChunkStatus {
                    spec: *spec,
                    state: ChunkState::Pending,
                    attempts: 0,
                })
                .collect();
        });

        let mut queue: VecDeque<usize> = (0..chunk_count).collect();
        let mut responses: Vec<Option<UploadResponse>> = vec![None; chunk_count];
        let mut pending: FuturesUnordered<BoxFuture<'_, Event>> = FuturesUnordered::new();
        let mut in_flight = 0usize;
        let mut failure: Option<(usize, UploadError)> = None;

        loop {
            if self.cancel.is_cancelled() {
                return ScheduleOutcome::Cancelled;
            }

            while failure.is_none()
                && in_flight < limit
                && let Some(index) = queue.pop_front()
            {
                let spec = chunks[index];
                let attempt = self.update(|task| {
                    let chunk = &mut task.chunks[index];
                    chunk.state = ChunkState::InFlight;
                    chunk.attempts += 1;
                    chunk.attempts
                });
                debug!(
                    task = %self.file_label(),
                    chunk = index,
                    attempt,
                    offset = spec.offset,
                    length = spec.length,
                    "dispatching chunk"
                );
                pending.push(self.attempt(spec, chunk_count).boxed());
                in_flight += 1;
            }

            if pending.is_empty() || (failure.is_some() && in_flight == 0) {
                break;
            }

            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ScheduleOutcome::Cancelled,
                Some(event) = pending.next() => event,
            };

            match event {
                Event::BackoffElapsed { index } => {
                    if failure.is_none() {
                        queue.push_front(index);
                    }
                }
                Event::Settled {
                    index,
                    token,
                    result,
                } => {
                    in_flight -= 1;
                    let spec = chunks[index];
                    match result {
                        Ok(response) => {
                            responses[index] = Some(response);
                            let snapshot = self.update(|task| {
                                task.chunks[index].state = ChunkState::Succeeded;
                                task.clone()
                            });
                            debug!(task = %snapshot.id, chunk = index, "chunk succeeded");
                            self.listener.on_chunk_success(&snapshot, &spec);
                            self.listener.on_progress(
                                &snapshot,
                                snapshot.transferred_bytes(),
                                snapshot.size,
                            );
                        }
                        Err(error) => {
                            if error.is_unauthorized()
                                && let Some(used) = &token
                            {
                                self.token.invalidate(used);
                            }

                            let attempts = self.update(|task| task.chunks[index].attempts);
                            if failure.is_none() && self.policy.should_retry(attempts, &error) {
                                let delay = self.policy.backoff_delay(attempts);
                                let snapshot = self.update(|task| {
                                    task.chunks[index].state = ChunkState::Pending;
                                    task.clone()
                                });
                                warn!(
                                    task = %snapshot.id,
                                    chunk = index,
                                    attempt = attempts,
                                    delay_ms = delay.as_millis() as u64,
                                    error = %error,
                                    "chunk failed, retrying"
                                );
                                self.listener.on_retry(&snapshot, &spec, attempts);
                                pending.push(
                                    async move {
                                        tokio::time::sleep(delay).await;
                                        Event::BackoffElapsed { index }
                                    }
                                    .boxed(),
                                );
                            } else {
                                self.update(|task| task.chunks[index].state = ChunkState::Failed);
                                debug!(chunk = index, error = %error, "chunk failed");
                                if failure.is_none() {
                                    failure = Some((index, error));
                                }
                            }
                        }
                    }
                }
            }
        }

        if let Some((chunk, error)) = failure {
            return ScheduleOutcome::Failed { chunk, error };
        }
        ScheduleOutcome::Completed(responses.into_iter().flatten().collect())
    }

    async fn attempt(&self, spec: ChunkSpec, chunk_count: usize) -> Event {
        let token = match self.token.get().await {
            Ok(token) => token,
            Err(e) => {
                return Event::Settled {
                    index: spec.index,
                    token: None,
                    result: Err(e.into()),
                };
            }
        };
        let result = self.send_chunk(spec, chunk_count, token.as_ref()).await;
        Event::Settled {
            index: spec.index,
            token,
            result,
        }
    }

    /// Reads the chunk's bytes lazily and sends them through the chain.
    async fn send_chunk(
        &self,
        spec: ChunkSpec,
        chunk_count: usize,
        token: Option<&Token>,
    ) -> Result<UploadResponse, UploadError> {
        let body = self.file.read_chunk(&spec).await?;
        let task_id = self.update(|task| task.id);
        let meta = ChunkMeta {
            task_id: task_id.0,
            file_name: self.file.name.clone(),
            mime_type: self.file.mime_type.clone(),
            file_size: self.file.size,
            chunk_index: spec.index,
            chunk_count,
            offset: spec.offset,
            length: spec.length,
            checksum: checksum_bytes(&body),
            transform: self.transform.clone(),
        };
        let request = UploadRequest::new(meta, body, token.map(Token::as_str));
        self.chain.execute(request, self.transport).await
    }

    fn update<R>(&self, f: impl FnOnce(&mut UploadTask) -> R) -> R {
        let mut task = self.task.lock().unwrap();
        f(&mut task)
    }

    fn file_label(&self) -> String {
        let id = self.update(|task| task.id);
        format!("{id}:{}", self.file.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::listener::NoopListener;
    use crate::retry::{BackoffConfig, DefaultRetryPolicy};
    use crate::transport::TransportFuture;
    use crate::types::TaskId;
    use skyload_protocol::TaskState;
    use skyload_transfer::plan_chunks;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Tracks peak concurrency. Chunks listed in `fail` fail immediately,
    /// every time; the rest succeed after 50ms.
    #[derive(Default)]
    struct GaugeTransport {
        state: Mutex<Gauge>,
        fail: Vec<usize>,
    }

    #[derive(Default)]
    struct Gauge {
        current: usize,
        peak: usize,
        calls: HashMap<usize, u32>,
    }

    impl Transport for GaugeTransport {
        fn send(&self, request: UploadRequest) -> TransportFuture<'_> {
            Box::pin(async move {
                let index = request.meta.chunk_index;
                {
                    let mut gauge = self.state.lock().unwrap();
                    *gauge.calls.entry(index).or_default() += 1;
                    if self.fail.contains(&index) {
                        return Err(TransportError("reset".into()));
                    }
                    gauge.current += 1;
                    gauge.peak = gauge.peak.max(gauge.current);
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.state.lock().unwrap().current -= 1;
                Ok(UploadResponse::empty(200))
            })
        }
    }

    fn task(size: u64) -> SharedTask {
        Arc::new(Mutex::new(UploadTask {
            id: TaskId(1),
            file_name: "data.bin".into(),
            mime_type: String::new(),
            size,
            state: TaskState::Transferring,
            chunks: Vec::new(),
        }))
    }

    async fn run_with(
        transport: &GaugeTransport,
        policy: &DefaultRetryPolicy,
        size: usize,
        chunk_size: u64,
        max_concurrency: usize,
    ) -> (ScheduleOutcome, SharedTask) {
        let file = UploadFile::from_bytes("data.bin", "", vec![7u8; size]);
        let shared = task(file.size);
        let token = TaskToken::new(None);
        let chain = InterceptorChain::default();
        let cancel = CancellationToken::new();
        let scheduler = TransferScheduler {
            file: &file,
            task: &shared,
            token: &token,
            transport,
            chain: &chain,
            policy,
            listener: &NoopListener,
            cancel: &cancel,
            max_concurrency,
            transform: None,
        };
        let chunks = plan_chunks(file.size, chunk_size, true).unwrap();
        let outcome = scheduler.run(chunks).await;
        (outcome, shared)
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency_window() {
        let transport = GaugeTransport::default();
        let policy = DefaultRetryPolicy::new(0, BackoffConfig::default());

        let (outcome, shared) = run_with(&transport, &policy, 100, 10, 3).await;

        match outcome {
            ScheduleOutcome::Completed(responses) => assert_eq!(responses.len(), 10),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(transport.state.lock().unwrap().peak, 3);
        let task = shared.lock().unwrap();
        assert!(task.chunks.iter().all(|c| c.state == ChunkState::Succeeded));
        assert_eq!(task.transferred_bytes(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_stops_new_dispatches() {
        let transport = GaugeTransport {
            fail: vec![0],
            ..Default::default()
        };
        let policy = DefaultRetryPolicy::new(0, BackoffConfig::default());

        let (outcome, shared) = run_with(&transport, &policy, 50, 10, 2).await;

        assert!(matches!(outcome, ScheduleOutcome::Failed { chunk: 0, .. }));
        // Chunks 0 and 1 were in flight together; nothing was started after.
        let gauge = transport.state.lock().unwrap();
        assert_eq!(gauge.calls.len(), 2);
        let task = shared.lock().unwrap();
        assert_eq!(task.chunks[0].state, ChunkState::Failed);
        assert_eq!(task.chunks[1].state, ChunkState::Succeeded);
        assert_eq!(task.chunks[4].state, ChunkState::Pending);
        assert_eq!(task.chunks[4].attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_count_attempts_per_chunk() {
        let transport = GaugeTransport {
            fail: vec![1],
            ..Default::default()
        };
        let policy = DefaultRetryPolicy::new(2, BackoffConfig::default());

        let (outcome, shared) = run_with(&transport, &policy, 30, 10, 3).await;

        assert!(matches!(outcome, ScheduleOutcome::Failed { chunk: 1, .. }));
        assert_eq!(transport.state.lock().unwrap().calls[&1], 3);
        assert_eq!(shared.lock().unwrap().chunks[1].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_discards_in_flight_attempts() {
        let transport = GaugeTransport::default();
        let policy = DefaultRetryPolicy::new(0, BackoffConfig::default());
        let file = UploadFile::from_bytes("data.bin", "", vec![1u8; 20]);
        let shared = task(file.size);
        let token = TaskToken::new(None);
        let chain = InterceptorChain::default();
        let cancel = CancellationToken::new();
        let scheduler = TransferScheduler {
            file: &file,
            task: &shared,
            token: &token,
            transport: &transport,
            chain: &chain,
            policy: &policy,
            listener: &NoopListener,
            cancel: &cancel,
            max_concurrency: 2,
            transform: None,
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let chunks = plan_chunks(file.size, 10, true).unwrap();
        assert!(matches!(
            scheduler.run(chunks).await,
            ScheduleOutcome::Cancelled
        ));
        let task = shared.lock().unwrap();
        assert!(task.chunks.iter().all(|c| c.state != ChunkState::Succeeded));
    }
}
