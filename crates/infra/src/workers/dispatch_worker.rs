use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kafka_pubsub_events::{DeliveryDispatcher, RecordStream};

/// Counters kept by a running dispatch worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub records: u64,
    pub malformed: u64,
    pub handler_failures: u64,
}

/// Handle to stop and join the background dispatch task.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) aborts the task.
#[derive(Debug)]
pub struct DispatchWorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl DispatchWorkerHandle {
    /// Stop accepting records and wait for the record in flight (if any) to finish delivery.
    pub async fn shutdown(mut self) -> WorkerStats {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(error = %err, "dispatch worker did not stop cleanly");
            }
        }
        self.stats()
    }

    pub fn stats(&self) -> WorkerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for DispatchWorkerHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

/// Single task that drains the consumer's record stream into the delivery dispatcher.
///
/// Records are dispatched one at a time in stream order. A malformed record or a failing
/// handler is logged and counted; the loop keeps going until shutdown is requested or the
/// stream ends.
#[derive(Debug)]
pub struct DispatchWorker;

impl DispatchWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(
        name: impl Into<String>,
        stream: RecordStream,
        dispatcher: DeliveryDispatcher,
    ) -> DispatchWorkerHandle {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        let join = tokio::spawn(worker_loop(
            name,
            stream,
            dispatcher,
            shutdown_rx,
            stats.clone(),
        ));

        DispatchWorkerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            stats,
        }
    }
}

async fn worker_loop(
    name: String,
    mut stream: RecordStream,
    dispatcher: DeliveryDispatcher,
    mut shutdown_rx: oneshot::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    debug!(worker = %name, "dispatch worker started");

    loop {
        let record = tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            record = stream.recv() => record,
        };

        let Some(record) = record else {
            info!(worker = %name, "record stream ended");
            break;
        };

        let outcome = dispatcher.dispatch(record);
        let mut counters = stats.lock().unwrap_or_else(PoisonError::into_inner);
        counters.records += 1;
        match outcome {
            Ok(report) => counters.handler_failures += report.failed as u64,
            Err(_) => counters.malformed += 1,
        }
    }

    stream.close();
    debug!(worker = %name, "dispatch worker stopped");
}
