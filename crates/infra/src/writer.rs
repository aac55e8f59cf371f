//! Background checkpoint writing.
//!
//! Each worker owns one writer thread. Projections hand it write requests
//! through a [`ThreadedCheckpointWriter`]; the thread appends to the store and
//! posts the completion back to the requesting projection's inbox.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use tracing::{debug, info, warn};

use eventide_events::Publisher;
use eventide_projections::{
    CheckpointStore, CheckpointStoreError, CheckpointWriteCompleted, CheckpointWriteRequest, CheckpointWriter,
    ProjectionMessage,
};

struct WriteJob {
    request: CheckpointWriteRequest,
    reply: Arc<dyn Publisher<ProjectionMessage>>,
}

/// Handle to a running writer thread.
#[derive(Debug)]
pub struct CheckpointWriterThread {
    jobs: mpsc::Sender<WriteJob>,
    join: thread::JoinHandle<()>,
}

impl CheckpointWriterThread {
    pub fn spawn(name: impl Into<String>, store: Arc<dyn CheckpointStore>) -> Self {
        let name = name.into();
        let (jobs_tx, jobs_rx) = mpsc::channel::<WriteJob>();

        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(thread_name)
            .spawn(move || writer_loop(&name, store.as_ref(), jobs_rx))
            .expect("failed to spawn checkpoint writer thread");

        Self { jobs: jobs_tx, join }
    }

    /// A writer whose completions are posted to `reply`.
    pub fn writer_for(&self, reply: Arc<dyn Publisher<ProjectionMessage>>) -> ThreadedCheckpointWriter {
        ThreadedCheckpointWriter {
            jobs: self.jobs.clone(),
            reply,
        }
    }

    /// Wait for queued writes to finish once every writer has been dropped.
    pub fn shutdown(self) {
        let Self { jobs, join } = self;
        drop(jobs);
        let _ = join.join();
    }
}

fn writer_loop(name: &str, store: &dyn CheckpointStore, jobs: mpsc::Receiver<WriteJob>) {
    info!(writer = name, "checkpoint writer started");

    // Ends when the handle and every writer have dropped their senders.
    while let Ok(WriteJob { request, reply }) = jobs.recv() {
        debug!(
            writer = name,
            projection = %request.projection,
            tag = %request.checkpoint.tag,
            "writing checkpoint"
        );
        // A panicking store fails this write only; the thread keeps serving the others.
        let completed = panic::catch_unwind(AssertUnwindSafe(|| request.execute(store))).unwrap_or_else(|payload| {
            let reason = panic_message(payload.as_ref());
            warn!(writer = name, projection = %request.projection, reason = %reason, "checkpoint store panicked");
            CheckpointWriteCompleted {
                request_id: request.request_id,
                result: Err(CheckpointStoreError::Write(format!("store panicked: {reason}"))),
            }
        });
        reply_with(reply.as_ref(), &request, completed);
    }

    info!(writer = name, "checkpoint writer stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn reply_with(
    reply: &dyn Publisher<ProjectionMessage>,
    request: &CheckpointWriteRequest,
    completed: CheckpointWriteCompleted,
) {
    if let Err(err) = reply.publish(ProjectionMessage::CheckpointWritten(completed)) {
        warn!(
            projection = %request.projection,
            request_id = request.request_id,
            error = %err,
            "checkpoint completion could not be delivered"
        );
    }
}

/// [`CheckpointWriter`] that queues writes on a [`CheckpointWriterThread`].
pub struct ThreadedCheckpointWriter {
    jobs: mpsc::Sender<WriteJob>,
    reply: Arc<dyn Publisher<ProjectionMessage>>,
}

impl CheckpointWriter for ThreadedCheckpointWriter {
    fn begin_write(&mut self, request: CheckpointWriteRequest) {
        let job = WriteJob {
            request,
            reply: Arc::clone(&self.reply),
        };
        // The write still completes, as a failure, so the manager can retry or fault.
        if let Err(mpsc::SendError(job)) = self.jobs.send(job) {
            warn!(projection = %job.request.projection, "checkpoint writer thread is gone");
            let completed = CheckpointWriteCompleted {
                request_id: job.request.request_id,
                result: Err(CheckpointStoreError::Unavailable("checkpoint writer thread is gone".into())),
            };
            reply_with(job.reply.as_ref(), &job.request, completed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use eventide_core::CheckpointTag;
    use eventide_projections::Checkpoint;
    use eventide_projections::testing::MemoryCheckpointStore;

    fn request(id: u64) -> CheckpointWriteRequest {
        CheckpointWriteRequest {
            request_id: id,
            projection: "p".into(),
            checkpoint: Checkpoint {
                tag: CheckpointTag::from_position(id as i64 * 10, id as i64 * 10),
                prior_tag: None,
                state: Some(format!("s{id}")),
            },
            emitted: vec![],
        }
    }

    #[test]
    fn writes_in_order_and_replies_to_the_requester() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let thread = CheckpointWriterThread::spawn("writer-test", store.clone());
        let (tx, rx) = mpsc::channel::<ProjectionMessage>();
        let mut writer = thread.writer_for(Arc::new(tx));

        writer.begin_write(request(1));
        writer.begin_write(request(2));

        for expected in [1, 2] {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                ProjectionMessage::CheckpointWritten(done) => {
                    assert_eq!(done.request_id, expected);
                    assert_eq!(done.result, Ok(()));
                }
                other => panic!("unexpected message {}", other.name()),
            }
        }
        drop(writer);
        thread.shutdown();

        let written: Vec<_> = store.checkpoints("p").into_iter().map(|c| c.state).collect();
        assert_eq!(written, vec![Some("s1".to_string()), Some("s2".to_string())]);
    }

    #[test]
    fn failures_are_reported_not_dropped() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.fail_next_writes(1);
        let thread = CheckpointWriterThread::spawn("writer-test-fail", store);
        let (tx, rx) = mpsc::channel::<ProjectionMessage>();
        let mut writer = thread.writer_for(Arc::new(tx));

        writer.begin_write(request(1));

        let ProjectionMessage::CheckpointWritten(done) = rx.recv_timeout(Duration::from_secs(5)).unwrap() else {
            panic!("expected a write completion");
        };
        assert!(done.result.is_err());
        drop(writer);
        thread.shutdown();
    }

    /// Panics on every append.
    struct PanickingStore;

    impl CheckpointStore for PanickingStore {
        fn read_last(&self, _: &str) -> Result<Option<Checkpoint>, CheckpointStoreError> {
            Ok(None)
        }

        fn append(&self, _: &str, _: &Checkpoint, _: &[eventide_events::EmittedEvent]) -> Result<(), CheckpointStoreError> {
            panic!("disk on fire");
        }
    }

    fn next_completion(rx: &mpsc::Receiver<ProjectionMessage>) -> CheckpointWriteCompleted {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            ProjectionMessage::CheckpointWritten(done) => done,
            other => panic!("unexpected message {}", other.name()),
        }
    }

    #[test]
    fn store_panic_fails_the_write_and_keeps_the_thread() {
        let thread = CheckpointWriterThread::spawn("writer-test-panic", Arc::new(PanickingStore));
        let (tx, rx) = mpsc::channel::<ProjectionMessage>();
        let mut writer = thread.writer_for(Arc::new(tx));

        writer.begin_write(request(1));
        writer.begin_write(request(2));

        for expected in [1, 2] {
            let done = next_completion(&rx);
            assert_eq!(done.request_id, expected);
            assert!(matches!(done.result, Err(CheckpointStoreError::Write(ref msg)) if msg.contains("disk on fire")));
        }
        drop(writer);
        thread.shutdown();
    }

    #[test]
    fn write_to_a_dead_thread_completes_as_unavailable() {
        let (jobs, jobs_rx) = mpsc::channel::<WriteJob>();
        drop(jobs_rx);
        let (tx, rx) = mpsc::channel::<ProjectionMessage>();
        let mut writer = ThreadedCheckpointWriter {
            jobs,
            reply: Arc::new(tx),
        };

        writer.begin_write(request(7));

        let done = next_completion(&rx);
        assert_eq!(done.request_id, 7);
        assert!(matches!(done.result, Err(CheckpointStoreError::Unavailable(_))));
    }
}
