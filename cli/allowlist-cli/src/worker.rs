use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::service::regenerate_snapshot;
use crate::store::{BlobStore, Snapshot};

pub(crate) type Outcome = Result<Arc<Snapshot>>;

pub(crate) enum WorkerCommand {
    Regenerate(oneshot::Sender<Outcome>),
}

/// Regeneration worker handle
///
/// Held by the service. Commands go to the worker over an unbounded channel;
/// the last committed snapshot is observed through a watch channel so readers
/// never wait on a running regeneration.
pub(crate) struct Handle {
    snapshot: watch::Receiver<Option<Arc<Snapshot>>>,
    commands: UnboundedSender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl Handle {
    /// Queues a regeneration and returns the receiver for its outcome.
    pub(crate) fn request(&self) -> Result<oneshot::Receiver<Outcome>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WorkerCommand::Regenerate(tx))
            .map_err(|_| Error::storage("regeneration worker", "stopped"))?;
        Ok(rx)
    }

    /// Queues a regeneration and waits for the run that serves it.
    pub(crate) async fn regenerate(&self) -> Outcome {
        self.request()?
            .await
            .map_err(|_| Error::storage("regeneration worker", "dropped request"))?
    }

    pub(crate) fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.borrow().clone()
    }

    /// Stops accepting commands and waits for queued runs to finish.
    pub(crate) async fn shutdown(self) {
        drop(self.commands);
        let _ = self.task.await;
    }
}

/// Single-writer regeneration loop
///
/// Only this task ever writes a snapshot. Each turn takes one request plus
/// every request already queued behind it, runs one regeneration, and answers
/// all of them with that run's outcome. A request arriving mid-run waits for
/// the next turn, so it always observes a run that began after it was sent.
pub(crate) struct WorkerLoop {
    config: Arc<ServiceConfig>,
    store: Arc<dyn BlobStore>,
    snapshot: watch::Sender<Option<Arc<Snapshot>>>,
    commands: UnboundedReceiver<WorkerCommand>,
}

impl WorkerLoop {
    pub(crate) fn spawn(
        config: Arc<ServiceConfig>,
        store: Arc<dyn BlobStore>,
        initial: Option<Snapshot>,
    ) -> Handle {
        let (snapshot_tx, snapshot_rx) = watch::channel(initial.map(Arc::new));
        let (commands_tx, commands_rx) = unbounded_channel();

        let worker = Self {
            config,
            store,
            snapshot: snapshot_tx,
            commands: commands_rx,
        };

        let task = tokio::spawn(worker.run());

        Handle {
            snapshot: snapshot_rx,
            commands: commands_tx,
            task,
        }
    }

    async fn run(mut self) {
        while let Some(first) = self.commands.recv().await {
            let mut waiters = vec![first];
            while let Ok(next) = self.commands.try_recv() {
                waiters.push(next);
            }

            debug!(coalesced = waiters.len(), "starting regeneration");
            let outcome = self.regenerate_once().await;

            for WorkerCommand::Regenerate(reply) in waiters {
                let _ = reply.send(outcome.clone());
            }
        }
        debug!("regeneration worker stopped");
    }

    async fn regenerate_once(&self) -> Outcome {
        let generation = self
            .snapshot
            .borrow()
            .as_ref()
            .map_or(1, |current| current.generation + 1);
        let config = Arc::clone(&self.config);
        let store = Arc::clone(&self.store);

        let built = tokio::task::spawn_blocking(move || {
            regenerate_snapshot(&config, store.as_ref(), generation)
        })
        .await
        .map_err(|e| Error::storage("regeneration task", e))?;

        match built {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.snapshot.send_replace(Some(Arc::clone(&snapshot)));
                Ok(snapshot)
            }
            Err(e) => {
                warn!(error = %e, generation, "regeneration failed, keeping previous snapshot");
                Err(e)
            }
        }
    }
}
