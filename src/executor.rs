use crate::error::Error;
use crate::id::Vid;
use crate::job::VipoJob;
use crate::vipo::Vipo;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// A job on its way to the worker its vipo is bound to.
pub(crate) struct Binding {
    pub vipo: Vipo,
    pub job: VipoJob,
}

struct Workload {
    worker: usize,
    outstanding: usize,
}

struct Lane {
    queue: Sender<Binding>,
    bound: AtomicUsize,
}

/// Binds vipos to workers.
///
/// While a vipo has a job queued or running it stays bound to one worker,
/// and every further job goes to that worker's queue. That is what keeps a
/// vipo from ever ticking on two threads at once.
pub(crate) struct Executor {
    workloads: Mutex<HashMap<Vid, Workload>>,
    lanes: Vec<Lane>,
}

impl Executor {
    /// Returns the executor and the queue of each worker.
    pub fn new(workers: usize) -> (Executor, Vec<Receiver<Binding>>) {
        let (lanes, queues) = (0..workers)
            .map(|_| {
                let (queue, receiver) = unbounded();
                (
                    Lane {
                        queue,
                        bound: AtomicUsize::new(0),
                    },
                    receiver,
                )
            })
            .unzip();

        let executor = Executor {
            workloads: Mutex::new(HashMap::new()),
            lanes,
        };
        (executor, queues)
    }

    /// Workers with no vipo bound.
    pub fn idle_workers(&self) -> usize {
        self.lanes
            .iter()
            .filter(|lane| lane.bound.load(Ordering::Relaxed) == 0)
            .count()
    }

    pub fn dispatch_jobs(&self, jobs: Vec<(Vipo, VipoJob)>) -> Result<(), Error> {
        for (vipo, job) in jobs {
            self.dispatch_job(vipo, job)?;
        }
        Ok(())
    }

    pub fn dispatch_job(&self, vipo: Vipo, job: VipoJob) -> Result<(), Error> {
        let mut workloads = self.workloads.lock();
        let worker = match workloads.get_mut(vipo.vid()) {
            Some(workload) => {
                workload.outstanding += 1;
                workload.worker
            }
            None => {
                let worker = self.least_loaded();
                self.lanes[worker].bound.fetch_add(1, Ordering::Relaxed);
                workloads.insert(
                    vipo.vid().clone(),
                    Workload {
                        worker,
                        outstanding: 1,
                    },
                );
                worker
            }
        };

        trace!(vid = %vipo.vid(), worker, "job bound");
        self.lanes[worker]
            .queue
            .send(Binding { vipo, job })
            .map_err(|_| Error::Ended)
    }

    // A snapshot; ties go to the lowest index.
    fn least_loaded(&self) -> usize {
        self.lanes
            .iter()
            .enumerate()
            .min_by_key(|&(index, lane)| (lane.bound.load(Ordering::Relaxed), index))
            .map_or(0, |(index, _)| index)
    }

    /// Called by a worker after each tick. Releases the binding once the
    /// vipo has nothing left in flight.
    pub fn finish_job(&self, vid: &Vid) -> Result<(), Error> {
        let mut workloads = self.workloads.lock();
        let remaining = match workloads.get_mut(vid) {
            Some(workload) => {
                workload.outstanding -= 1;
                workload.outstanding
            }
            None => {
                return Err(Error::kernel_fault(format!(
                    "finished a job of {:#} without a binding",
                    vid
                )))
            }
        };

        if remaining == 0 {
            if let Some(workload) = workloads.remove(vid) {
                self.lanes[workload.worker]
                    .bound
                    .fetch_sub(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
