use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::config::WorkersConfig;
use crate::db::queue_repo::{self, QueueEntry};
use crate::db::Database;
use crate::error::WorkerError;
use crate::worker::executor::JobWorker;
use crate::worker::outcome::JobOutcome;
use crate::worker::reconciler::Reconciler;

/// Timing knobs for the dispatcher.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub reconcile_interval: Duration,
}

impl From<&WorkersConfig> for PoolSettings {
    fn from(config: &WorkersConfig) -> Self {
        Self {
            worker_count: config.count.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
        }
    }
}

/// Dispatcher thread plus worker threads draining the durable queue.
pub struct WorkerPool {
    entry_receiver: Receiver<QueueEntry>,
    outcome_receiver: Receiver<JobOutcome>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    db: Database,
}

impl WorkerPool {
    pub fn start(
        db: Database,
        worker: Arc<JobWorker>,
        reconciler: Reconciler,
        settings: PoolSettings,
    ) -> Result<Self, WorkerError> {
        let worker_count = settings.worker_count.max(1);
        let (entry_sender, entry_receiver) = bounded::<QueueEntry>(worker_count);
        let (outcome_sender, outcome_receiver) = unbounded::<JobOutcome>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let entry_rx = entry_receiver.clone();
            let outcome_tx = outcome_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let job_worker = Arc::clone(&worker);

            let handle = thread::Builder::new()
                .name(format!("scribeflow-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, entry_rx, outcome_tx, shutdown_flag, job_worker);
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        let dispatcher = {
            let db = db.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let claim_for = worker.lease_duration();
            thread::Builder::new()
                .name("scribeflow-dispatcher".to_string())
                .spawn(move || {
                    run_dispatcher(db, entry_sender, reconciler, settings, claim_for, shutdown_flag);
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?
        };

        info!("Started {} workers", worker_count);

        Ok(Self {
            entry_receiver,
            outcome_receiver,
            dispatcher: Some(dispatcher),
            workers,
            shutdown,
            db,
        })
    }

    pub fn try_recv_outcome(&self) -> Option<JobOutcome> {
        self.outcome_receiver.try_recv().ok()
    }

    pub fn recv_outcome_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.outcome_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops dispatching, joins all threads and releases the claims of
    /// entries that were handed out but never started.
    pub fn wait(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.join() {
                error!("Dispatcher panicked: {:?}", e);
            }
        }

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        for entry in self.entry_receiver.try_iter() {
            if let Err(e) = queue_repo::release(&self.db, &entry.job_id) {
                warn!("Failed to release claim on {}: {}", entry.job_id, e);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_dispatcher(
    db: Database,
    entry_sender: Sender<QueueEntry>,
    reconciler: Reconciler,
    settings: PoolSettings,
    claim_for: chrono::Duration,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Dispatcher started");
    let mut last_sweep: Option<Instant> = None;

    while !shutdown.load(Ordering::Relaxed) {
        if last_sweep.map_or(true, |t| t.elapsed() >= settings.reconcile_interval) {
            match reconciler.sweep(Utc::now()) {
                Ok(report) if report.expired + report.requeued > 0 => {
                    info!(
                        "Reconciled queue: {} expired, {} re-queued",
                        report.expired, report.requeued
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Reconciliation sweep failed: {}", e),
            }
            last_sweep = Some(Instant::now());
        }

        if entry_sender.is_full() {
            thread::sleep(settings.poll_interval);
            continue;
        }

        match queue_repo::claim_due(&db, Utc::now(), claim_for) {
            Ok(Some(entry)) => {
                debug!("Dispatching job {}", entry.job_id);
                if entry_sender.send(entry).is_err() {
                    debug!("All workers gone, dispatcher exiting");
                    break;
                }
            }
            Ok(None) => thread::sleep(settings.poll_interval),
            Err(e) => {
                error!("Failed to claim queue entry: {}", e);
                thread::sleep(settings.poll_interval);
            }
        }
    }

    debug!("Dispatcher stopped");
}

fn run_worker(
    worker_id: usize,
    entry_receiver: Receiver<QueueEntry>,
    outcome_sender: Sender<JobOutcome>,
    shutdown: Arc<AtomicBool>,
    job_worker: Arc<JobWorker>,
) {
    debug!("Worker {} started", worker_id);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Worker {}: {}", worker_id, WorkerError::Runtime(e));
            return;
        }
    };

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match entry_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(entry) => {
                debug!("Worker {} processing job {}", worker_id, entry.job_id);
                let outcome = runtime.block_on(job_worker.process(entry));

                if let Err(e) = outcome_sender.send(outcome) {
                    error!("Worker {} failed to send outcome: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} entry channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
