//! Projection worker pool.
//!
//! A fixed number of worker threads host the projections. Each projection is
//! pinned to one worker at creation and is only ever touched by that thread,
//! so a [`CoreProjection`] needs no locking. Everything a projection receives
//! (subscription deliveries, checkpoint completions, control requests) arrives
//! through its worker's queue tagged with the projection id.
//!
//! Each worker also owns a [`CheckpointWriterThread`] so checkpoint writes
//! never block event processing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use eventide_core::ProjectionId;
use eventide_events::{ProjectionReport, PublishError, Publisher};
use eventide_projections::{
    CheckpointStore, CoreProjection, ProjectionConfig, ProjectionDependencies, ProjectionError, ProjectionMessage,
    SourceDefinition, StateHandler, SubscriptionSource,
};

use crate::writer::CheckpointWriterThread;

/// How long a stopping worker waits for in-flight checkpoint writes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens subscriptions for newly created projections.
pub trait SubscriptionProvider: Send + Sync {
    fn open_subscription(
        &self,
        source: &SourceDefinition,
        inbox: Arc<dyn Publisher<ProjectionMessage>>,
    ) -> Box<dyn SubscriptionSource>;
}

impl<P> SubscriptionProvider for Arc<P>
where
    P: SubscriptionProvider + ?Sized,
{
    fn open_subscription(
        &self,
        source: &SourceDefinition,
        inbox: Arc<dyn Publisher<ProjectionMessage>>,
    ) -> Box<dyn SubscriptionSource> {
        (**self).open_subscription(source, inbox)
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("unknown projection {0}")]
    UnknownProjection(ProjectionId),

    #[error("a projection named '{0}' already exists")]
    DuplicateName(String),

    #[error(transparent)]
    InvalidProjection(#[from] ProjectionError),

    #[error("worker {0} is no longer running")]
    WorkerGone(usize),
}

/// The inbox of one projection: its worker's queue plus its id.
#[derive(Clone)]
struct ProjectionInbox {
    id: ProjectionId,
    worker: mpsc::Sender<WorkerMessage>,
}

impl Publisher<ProjectionMessage> for ProjectionInbox {
    fn publish(&self, message: ProjectionMessage) -> Result<(), PublishError> {
        self.worker
            .send(WorkerMessage::Deliver { id: self.id, message })
            .map_err(|_| PublishError::Disconnected)
    }
}

struct CreateProjection {
    id: ProjectionId,
    config: ProjectionConfig,
    handler: Box<dyn StateHandler>,
    subscription: Box<dyn SubscriptionSource>,
    inbox: ProjectionInbox,
}

enum WorkerMessage {
    Create(Box<CreateProjection>),
    Deliver {
        id: ProjectionId,
        message: ProjectionMessage,
    },
    Shutdown,
}

struct WorkerSlot {
    sender: mpsc::Sender<WorkerMessage>,
    join: Option<thread::JoinHandle<()>>,
}

#[derive(Default)]
struct Registry {
    workers: HashMap<ProjectionId, usize>,
    names: HashMap<String, ProjectionId>,
}

/// Fixed-size pool of projection worker threads.
pub struct ProjectionWorkerPool {
    workers: Vec<WorkerSlot>,
    registry: RwLock<Registry>,
    next_worker: AtomicUsize,
    subscriptions: Arc<dyn SubscriptionProvider>,
}

impl ProjectionWorkerPool {
    /// Spawn `workers` threads (at least one), each with its own checkpoint writer.
    pub fn spawn(
        workers: usize,
        store: Arc<dyn CheckpointStore>,
        subscriptions: Arc<dyn SubscriptionProvider>,
        reports: Arc<dyn Publisher<ProjectionReport>>,
    ) -> Self {
        let workers = (0..workers.max(1))
            .map(|index| {
                let name = format!("projection-worker-{index}");
                let (tx, rx) = mpsc::channel::<WorkerMessage>();
                let worker = Worker {
                    index,
                    writer: CheckpointWriterThread::spawn(format!("{name}-writer"), Arc::clone(&store)),
                    store: Arc::clone(&store),
                    reports: Arc::clone(&reports),
                    projections: HashMap::new(),
                };

                let join = thread::Builder::new()
                    .name(name)
                    .spawn(move || worker.run(rx))
                    .expect("failed to spawn projection worker thread");

                WorkerSlot {
                    sender: tx,
                    join: Some(join),
                }
            })
            .collect();

        Self {
            workers,
            registry: RwLock::new(Registry::default()),
            next_worker: AtomicUsize::new(0),
            subscriptions,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Create a projection on the next worker (round robin) and start loading it.
    ///
    /// Names are unique within the pool.
    pub fn create(&self, config: ProjectionConfig, handler: Box<dyn StateHandler>) -> Result<ProjectionId, WorkerError> {
        config.validate()?;

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.names.contains_key(&config.name) {
            return Err(WorkerError::DuplicateName(config.name));
        }

        let id = ProjectionId::new();
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let inbox = ProjectionInbox {
            id,
            worker: self.workers[index].sender.clone(),
        };
        let subscription = self
            .subscriptions
            .open_subscription(&config.source, Arc::new(inbox.clone()));
        let name = config.name.clone();

        let create = CreateProjection {
            id,
            config,
            handler,
            subscription,
            inbox,
        };
        self.workers[index]
            .sender
            .send(WorkerMessage::Create(Box::new(create)))
            .map_err(|_| WorkerError::WorkerGone(index))?;

        info!(projection = %name, projection_id = %id, worker = index, "projection created");
        registry.workers.insert(id, index);
        registry.names.insert(name, id);
        Ok(id)
    }

    /// Queue `message` for projection `id`.
    pub fn send(&self, id: ProjectionId, message: ProjectionMessage) -> Result<(), WorkerError> {
        let index = self.worker_of(id).ok_or(WorkerError::UnknownProjection(id))?;
        self.workers[index]
            .sender
            .send(WorkerMessage::Deliver { id, message })
            .map_err(|_| WorkerError::WorkerGone(index))
    }

    /// Request a graceful stop; a `Stopped` report follows.
    pub fn stop(&self, id: ProjectionId) -> Result<(), WorkerError> {
        self.send(id, ProjectionMessage::Stop)
    }

    /// Request a `State` report.
    pub fn request_state(&self, id: ProjectionId) -> Result<(), WorkerError> {
        self.send(id, ProjectionMessage::GetState)
    }

    /// Request a `Statistics` report.
    pub fn request_statistics(&self, id: ProjectionId) -> Result<(), WorkerError> {
        self.send(id, ProjectionMessage::GetStatistics)
    }

    pub fn worker_of(&self, id: ProjectionId) -> Option<usize> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.workers.get(&id).copied()
    }

    pub fn projection_id(&self, name: &str) -> Option<ProjectionId> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.names.get(name).copied()
    }

    /// Stop every projection, let in-flight writes drain and join all workers.
    pub fn shutdown(mut self) {
        for slot in &self.workers {
            let _ = slot.sender.send(WorkerMessage::Shutdown);
        }
        for slot in &mut self.workers {
            if let Some(j) = slot.join.take() {
                let _ = j.join();
            }
        }
    }
}

/// State owned by one worker thread.
struct Worker {
    index: usize,
    store: Arc<dyn CheckpointStore>,
    reports: Arc<dyn Publisher<ProjectionReport>>,
    writer: CheckpointWriterThread,
    projections: HashMap<ProjectionId, CoreProjection<Box<dyn StateHandler>>>,
}

impl Worker {
    fn run(mut self, inbox: mpsc::Receiver<WorkerMessage>) {
        info!(worker = self.index, "projection worker started");

        while let Ok(message) = inbox.recv() {
            match message {
                WorkerMessage::Create(create) => self.create(*create),
                WorkerMessage::Deliver { id, message } => self.deliver(id, message),
                WorkerMessage::Shutdown => break,
            }
        }

        self.drain(&inbox);
        let Worker {
            index,
            writer,
            projections,
            ..
        } = self;
        // Projections hold writer handles; the writer thread exits once they are gone.
        drop(projections);
        writer.shutdown();
        info!(worker = index, "projection worker stopped");
    }

    fn create(&mut self, create: CreateProjection) {
        let CreateProjection {
            id,
            config,
            handler,
            subscription,
            inbox,
        } = create;
        let name = config.name.clone();

        let deps = ProjectionDependencies {
            store: Arc::clone(&self.store),
            writer: Box::new(self.writer.writer_for(Arc::new(inbox))),
            subscription,
            reports: Arc::clone(&self.reports),
        };
        let mut projection = match CoreProjection::new(id, config, handler, deps) {
            Ok(p) => p,
            Err(err) => {
                warn!(worker = self.index, projection = %name, error = %err, "projection could not be created");
                return;
            }
        };

        if let Err(err) = projection.begin_load_state() {
            warn!(worker = self.index, projection = %name, error = %err, "projection failed to load");
        }
        self.projections.insert(id, projection);
    }

    fn deliver(&mut self, id: ProjectionId, message: ProjectionMessage) {
        let Some(projection) = self.projections.get_mut(&id) else {
            debug!(worker = self.index, projection_id = %id, message = message.name(), "message for unknown projection dropped");
            return;
        };

        if let Err(err) = projection.handle_message(message) {
            if err.is_ordering_violation() {
                debug!(worker = self.index, projection = %projection.name(), error = %err, "out-of-order message dropped");
            } else {
                warn!(worker = self.index, projection = %projection.name(), error = %err, "projection message failed");
            }
        }
    }

    /// Stop all projections, waiting a bounded time for outstanding writes.
    fn drain(&mut self, inbox: &mpsc::Receiver<WorkerMessage>) {
        for projection in self.projections.values_mut() {
            projection.stopping();
        }

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.projections.values().any(|p| !p.status().is_terminal()) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match inbox.recv_timeout(remaining) {
                Ok(WorkerMessage::Deliver { id, message }) => self.deliver(id, message),
                Ok(_) => continue,
                Err(_) => break,
            }
        }

        for projection in self.projections.values_mut() {
            projection.stopped();
        }
    }
}
