use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::job::Job;
use crate::pipeline::{Pipeline, ProgressReporter};
use crate::shutdown::Shutdown;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// A job and its position in the input, so results can be put back in order.
type Slot = (usize, Job);

/// Bounded pool of worker threads driving jobs through a [`Pipeline`].
///
/// Each worker owns one job at a time and runs it to a terminal stage (or
/// until shutdown) before taking the next one, so a job never has two
/// stages in flight.
pub struct JobScheduler {
    worker_count: usize,
    pipeline: Arc<Pipeline>,
    progress: Arc<dyn ProgressReporter>,
    shutdown: Shutdown,
}

impl JobScheduler {
    pub fn new(
        worker_count: usize,
        pipeline: Arc<Pipeline>,
        progress: Arc<dyn ProgressReporter>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            worker_count: worker_count.max(1),
            pipeline,
            progress,
            shutdown,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Runs every job and returns all of them, in input order.
    ///
    /// Jobs still queued when shutdown triggers come back untouched.
    pub fn run_batch(&self, jobs: Vec<Job>) -> Result<Vec<Job>, WorkerError> {
        let total = jobs.len();
        let worker_count = self.worker_count.min(total.max(1));
        let (job_sender, job_receiver) = bounded::<Slot>(worker_count * 2);
        let (result_sender, result_receiver) = unbounded::<Slot>();

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let pipeline = Arc::clone(&self.pipeline);
            let progress = Arc::clone(&self.progress);
            let shutdown = self.shutdown.clone();

            let handle = thread::Builder::new()
                .name(format!("reelscope-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, job_rx, result_tx, shutdown, pipeline, progress);
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }
        drop(job_receiver);
        drop(result_sender);

        info!("Started {} workers for {} jobs", worker_count, total);

        let mut results: Vec<Option<Job>> = Vec::with_capacity(total);
        results.resize_with(total, || None);

        for (index, job) in jobs.into_iter().enumerate() {
            if self.shutdown.is_triggered() {
                results[index] = Some(job);
                continue;
            }
            if let Err(e) = job_sender.send((index, job)) {
                // Every worker is gone; keep the job so it is still reported.
                error!("Job channel closed while submitting job {}", index);
                let (index, job) = e.into_inner();
                results[index] = Some(job);
            }
        }
        // Dropping the sender lets workers drain the queue and exit.
        drop(job_sender);

        for (index, job) in result_receiver.iter() {
            results[index] = Some(job);
        }

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        let missing = results.iter().filter(|r| r.is_none()).count();
        if missing > 0 {
            return Err(WorkerError::ChannelClosed);
        }
        info!("All workers have stopped");
        Ok(results.into_iter().flatten().collect())
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<Slot>,
    result_sender: Sender<Slot>,
    shutdown: Shutdown,
    pipeline: Arc<Pipeline>,
    progress: Arc<dyn ProgressReporter>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        match job_receiver.recv_timeout(RECV_TIMEOUT) {
            Ok((index, job)) => {
                let job = if shutdown.is_triggered() {
                    debug!("Worker {} returning job {} untouched", worker_id, job.id());
                    job
                } else {
                    debug!("Worker {} processing job {}", worker_id, job.id());
                    let fallback = job.clone();
                    let progress = progress.as_ref();
                    match panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(job, progress))) {
                        Ok(job) => job,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            warn!(
                                "Worker {} panicked on job {}: {}",
                                worker_id,
                                fallback.id(),
                                message
                            );
                            pipeline.recover_panicked(fallback, &message, progress)
                        }
                    }
                };

                if let Err(e) = result_sender.send((index, job)) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
