use crate::actor::{Actor, Failure};
use crate::allocator::VidAllocator;
use crate::controller::{Controller, VmState};
use crate::coordinator::{self, Coordinator};
use crate::error::Error;
use crate::executor::Executor;
use crate::id::Vid;
use crate::inspector::Inspector;
use crate::registry::Registry;
use crate::signal::EndSignal;
use crate::timing::{self, TimingThread};
use crate::tuning::Tuning;
use crate::vipo::{Links, Vipo};
use crate::worker::Worker;
use crossbeam_channel::{unbounded, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, debug_span, error, info};

/// The runtime: one coordinator thread, a fixed pool of worker threads and
/// one timing thread, plus the registry of attached vipos.
///
/// Vipos are created with [`create`](#method.create) and attached when
/// started. Dropping the virtual machine shuts it down: every thread is
/// joined, then every attached vipo gets its `on_destroy` call and is
/// released.
pub struct VirtualMachine {
    controller: Arc<Controller>,
    inspector: Arc<Inspector>,
    registry: Arc<Registry>,
    allocator: VidAllocator,
    requests: Sender<coordinator::Request>,
    timing: Sender<timing::Request>,
    workers: usize,
    threads: Vec<JoinHandle<()>>,
}

impl VirtualMachine {
    /// Build the virtual machine and spawn its threads.
    pub fn new(tuning: Tuning) -> Result<VirtualMachine, Error> {
        VirtualMachine::build(tuning, EndSignal::new())
    }

    /// The virtual machine also ends when `external` does.
    pub fn with_end_signal(
        tuning: Tuning,
        external: &EndSignal,
    ) -> Result<VirtualMachine, Error> {
        VirtualMachine::build(tuning, external.child())
    }

    fn build(tuning: Tuning, end: EndSignal) -> Result<VirtualMachine, Error> {
        let allocator = VidAllocator::new(tuning.node_id, tuning.max_index, 0)?;
        let workers = tuning.worker_count();
        let controller = Arc::new(Controller::new(end.clone()));
        let inspector = Arc::new(Inspector::new(tuning.diagnostics));
        let registry = Arc::new(Registry::new());
        let (requests, request_queue) = unbounded();
        let (timing, timing_queue) = unbounded();
        let (executor, worker_queues) = Executor::new(workers);
        let executor = Arc::new(executor);

        // on a spawn failure dropping `vm` stops what already runs
        let mut vm = VirtualMachine {
            controller,
            inspector,
            registry,
            allocator,
            requests: requests.clone(),
            timing,
            workers,
            threads: Vec::with_capacity(workers + 2),
        };
        let prefix = &tuning.thread_name_prefix;

        for (index, queue) in worker_queues.into_iter().enumerate() {
            let worker = Worker::new(
                index,
                queue,
                Arc::clone(&executor),
                Arc::clone(&vm.inspector),
                end.clone(),
            );
            vm.spawn(format!("{}-vp{}", prefix, index), move || worker.run())?;
        }

        let coordinator = Coordinator::new(
            request_queue,
            Arc::clone(&vm.registry),
            executor,
            Arc::clone(&vm.inspector),
            end.clone(),
            tuning.circle_budget,
        );
        vm.spawn(format!("{}-kernel", prefix), move || coordinator.run())?;

        let timing_thread = TimingThread::new(timing_queue, requests, end);
        vm.spawn(format!("{}-timer", prefix), move || timing_thread.run())?;

        info!(workers, "virtual machine running");
        Ok(vm)
    }

    /// Spawn a kernel thread. A regular stop of `body` ends the virtual
    /// machine, any other error or a panic is reported as fatal.
    fn spawn<F>(&mut self, name: String, body: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), Error> + Send + 'static,
    {
        let controller = Arc::clone(&self.controller);
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name).spawn(move || {
            let _span = debug_span!("kernel", thread = %thread_name).entered();
            debug!("thread started");

            let outcome = catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|panic| {
                Err(Error::kernel_fault(format!(
                    "thread {} {}",
                    thread_name,
                    Failure::from_panic(panic)
                )))
            });
            match outcome {
                Ok(()) | Err(Error::Ended) => controller.request_to_end(),
                Err(err) => controller.handle_error(err),
            }

            debug!("thread stopped");
        })?;
        self.threads.push(handle);
        Ok(())
    }

    /// Wrap `actor` into a vipo with a fresh id. It is not attached until
    /// started.
    pub fn create<A: Actor>(&self, actor: A) -> Result<Vipo, Error> {
        self.create_vipo(None, Box::new(actor))
    }

    /// Like `create`, with a debug label carried by the id.
    pub fn create_labeled<A: Actor>(&self, label: &str, actor: A) -> Result<Vipo, Error> {
        self.create_vipo(Some(label), Box::new(actor))
    }

    fn create_vipo(&self, label: Option<&str>, actor: Box<dyn Actor>) -> Result<Vipo, Error> {
        if self.state() != VmState::Running {
            return Err(Error::Ended);
        }
        let vid = match self.registry.reserve(&self.allocator, label) {
            Ok(vid) => vid,
            // exhaustion means vipos leak somewhere
            Err(Error::KernelFault { reason }) => {
                self.controller.handle_error(Error::kernel_fault(reason.clone()));
                return Err(Error::KernelFault { reason });
            }
            Err(err) => return Err(err),
        };

        debug!(vid = %vid, "vipo created");
        Ok(Vipo::new(
            vid,
            actor,
            Links {
                requests: self.requests.clone(),
                timing: self.timing.clone(),
                controller: Arc::clone(&self.controller),
                inspector: Arc::clone(&self.inspector),
                registry: Arc::downgrade(&self.registry),
            },
        ))
    }

    /// An attached vipo by id.
    pub fn find(&self, vid: &Vid) -> Option<Vipo> {
        self.registry.get(vid)
    }

    /// Running, ending or ended.
    pub fn state(&self) -> VmState {
        self.controller.state()
    }

    /// The first fatal error, if any.
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.controller.last_error()
    }

    /// Called once, with the first fatal error.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.controller.set_handler(Box::new(handler));
    }

    /// Attached vipos.
    pub fn vipos_count(&self) -> usize {
        self.registry.len()
    }

    /// Size of the worker pool.
    pub fn workers_count(&self) -> usize {
        self.workers
    }

    /// Messages dropped because their recipient was unknown or gone.
    pub fn discarded_messages(&self) -> u64 {
        self.inspector.discarded_messages()
    }

    /// Diagnostic counters.
    pub fn inspector(&self) -> &Inspector {
        &self.inspector
    }

    /// Fires once the virtual machine ends.
    pub fn end_signal(&self) -> EndSignal {
        self.controller.end_signal().clone()
    }

    /// Stop admitting work. Threads wind down after their current tick.
    pub fn request_to_end(&self) {
        self.controller.request_to_end();
    }

    /// End, join every thread, then dispose and release every attached vipo.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.threads.is_empty() && self.state() == VmState::Ended {
            return;
        }
        self.controller.request_to_end();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("kernel thread panicked outside its guard");
            }
        }

        let released = self.registry.drain();
        debug!(vipos = released.len(), "releasing vipos");
        for vipo in &released {
            vipo.dispose();
        }

        self.controller.mark_ended();
        info!("virtual machine ended");
    }
}

impl Drop for VirtualMachine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ::std::fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("state", &self.state())
            .field("workers", &self.workers)
            .field("vipos", &self.vipos_count())
            .finish()
    }
}
