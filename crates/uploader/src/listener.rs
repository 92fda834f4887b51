//! Lifecycle notifications.
//!
//! Every callback has a no-op default, so listeners implement only what they
//! care about. For one task, callbacks are never invoked concurrently and
//! exactly one of `on_success`, `on_failure` or `on_cancel` ends the stream.

use skyload_transfer::ChunkSpec;
use tokio::sync::mpsc;

use crate::error::UploadFailure;
use crate::types::{UploadFile, UploadResult, UploadTask};

/// Receives upload lifecycle callbacks.
#[allow(unused_variables)]
pub trait UploadListener: Send + Sync {
    /// A selected file did not pass the accept filter.
    fn on_rejected(&self, file: &UploadFile, reason: &str) {}

    /// A task left `Pending`.
    fn on_start(&self, task: &UploadTask) {}

    /// Bytes accepted by the server so far.
    fn on_progress(&self, task: &UploadTask, bytes_sent: u64, bytes_total: u64) {}

    fn on_chunk_success(&self, task: &UploadTask, chunk: &ChunkSpec) {}

    /// `attempt` is the 1-based retry number.
    fn on_retry(&self, task: &UploadTask, chunk: &ChunkSpec, attempt: u32) {}

    fn on_success(&self, task: &UploadTask, result: &UploadResult) {}

    fn on_failure(&self, task: &UploadTask, failure: &UploadFailure) {}

    fn on_cancel(&self, task: &UploadTask) {}
}

/// Listener that ignores everything.
pub struct NoopListener;

impl UploadListener for NoopListener {}

/// Event forwarded by [`ChannelListener`].
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Rejected {
        file_name: String,
        reason: String,
    },
    Started {
        task: UploadTask,
    },
    Progress {
        task: UploadTask,
        bytes_sent: u64,
        bytes_total: u64,
    },
    ChunkSucceeded {
        task: UploadTask,
        chunk: ChunkSpec,
    },
    Retrying {
        task: UploadTask,
        chunk: ChunkSpec,
        attempt: u32,
    },
    Succeeded {
        task: UploadTask,
        result: UploadResult,
    },
    Failed {
        task: UploadTask,
        chunk: Option<usize>,
        error: String,
    },
    Cancelled {
        task: UploadTask,
    },
}

/// Forwards callbacks into an unbounded mpsc channel.
///
/// Callbacks are synchronous, so the channel never applies backpressure and
/// never drops an event. Events are only lost once the receiver is gone.
pub struct ChannelListener {
    events_tx: mpsc::UnboundedSender<UploadEvent>,
}

impl ChannelListener {
    /// Creates a listener and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (Self { events_tx }, events_rx)
    }

    fn emit(&self, event: UploadEvent) {
        if self.events_tx.send(event).is_err() {
            tracing::debug!("upload event receiver dropped");
        }
    }
}

impl UploadListener for ChannelListener {
    fn on_rejected(&self, file: &UploadFile, reason: &str) {
        self.emit(UploadEvent::Rejected {
            file_name: file.name.clone(),
            reason: reason.to_string(),
        });
    }

    fn on_start(&self, task: &UploadTask) {
        self.emit(UploadEvent::Started { task: task.clone() });
    }

    fn on_progress(&self, task: &UploadTask, bytes_sent: u64, bytes_total: u64) {
        self.emit(UploadEvent::Progress {
            task: task.clone(),
            bytes_sent,
            bytes_total,
        });
    }

    fn on_chunk_success(&self, task: &UploadTask, chunk: &ChunkSpec) {
        self.emit(UploadEvent::ChunkSucceeded {
            task: task.clone(),
            chunk: *chunk,
        });
    }

    fn on_retry(&self, task: &UploadTask, chunk: &ChunkSpec, attempt: u32) {
        self.emit(UploadEvent::Retrying {
            task: task.clone(),
            chunk: *chunk,
            attempt,
        });
    }

    fn on_success(&self, task: &UploadTask, result: &UploadResult) {
        self.emit(UploadEvent::Succeeded {
            task: task.clone(),
            result: result.clone(),
        });
    }

    fn on_failure(&self, task: &UploadTask, failure: &UploadFailure) {
        self.emit(UploadEvent::Failed {
            task: task.clone(),
            chunk: failure.chunk,
            error: failure.error.to_string(),
        });
    }

    fn on_cancel(&self, task: &UploadTask) {
        self.emit(UploadEvent::Cancelled { task: task.clone() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskId;
    use skyload_protocol::TaskState;

    fn task() -> UploadTask {
        UploadTask {
            id: TaskId(1),
            file_name: "a.bin".into(),
            mime_type: String::new(),
            size: 4,
            state: TaskState::Transferring,
            chunks: Vec::new(),
        }
    }

    #[test]
    fn noop_listener_accepts_all_callbacks() {
        let listener = NoopListener;
        let chunk = ChunkSpec {
            index: 0,
            offset: 0,
            length: 4,
        };
        listener.on_start(&task());
        listener.on_progress(&task(), 1, 4);
        listener.on_retry(&task(), &chunk, 1);
        listener.on_cancel(&task());
    }

    #[tokio::test]
    async fn channel_listener_forwards_in_order() {
        let (listener, mut rx) = ChannelListener::new();
        let chunk = ChunkSpec {
            index: 0,
            offset: 0,
            length: 4,
        };
        listener.on_start(&task());
        listener.on_chunk_success(&task(), &chunk);
        listener.on_cancel(&task());
        drop(listener);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], UploadEvent::Started { .. }));
        assert!(matches!(events[1], UploadEvent::ChunkSucceeded { .. }));
        assert!(matches!(events[2], UploadEvent::Cancelled { .. }));
    }

    #[tokio::test]
    async fn channel_listener_keeps_terminal_event_behind_a_backlog() {
        let (listener, mut rx) = ChannelListener::new();
        for _ in 0..256 {
            listener.on_progress(&task(), 1, 4);
        }
        listener.on_cancel(&task());
        drop(listener);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(events.len(), 257);
        assert!(matches!(events.last(), Some(UploadEvent::Cancelled { .. })));
    }

    #[test]
    fn channel_listener_survives_dropped_receiver() {
        let (listener, rx) = ChannelListener::new();
        drop(rx);
        listener.on_start(&task());
    }
}
