use crate::error::Error;
use crate::executor::{Binding, Executor};
use crate::inspector::Inspector;
use crate::signal::EndSignal;
use crossbeam_channel::{select, Receiver};
use std::sync::Arc;
use tracing::trace;

pub(crate) struct Worker {
    index: usize,
    queue: Receiver<Binding>,
    executor: Arc<Executor>,
    inspector: Arc<Inspector>,
    end: EndSignal,
}

impl Worker {
    pub fn new(
        index: usize,
        queue: Receiver<Binding>,
        executor: Arc<Executor>,
        inspector: Arc<Inspector>,
        end: EndSignal,
    ) -> Self {
        Worker {
            index,
            queue,
            executor,
            inspector,
            end,
        }
    }

    /// Runs until the end signal. Returns `Error::Ended` on a regular stop.
    pub fn run(self) -> Result<(), Error> {
        loop {
            let binding = select! {
                recv(self.queue) -> binding => binding.map_err(|_| Error::Ended)?,
                recv(self.end.watch()) -> _ => return Err(Error::Ended),
            };
            self.work(binding)?;

            // keep draining what is already bound here without blocking
            while !self.end.is_ended() {
                match self.queue.try_recv() {
                    Ok(binding) => self.work(binding)?,
                    Err(_) => break,
                }
            }
        }
    }

    fn work(&self, binding: Binding) -> Result<(), Error> {
        let Binding { vipo, job } = binding;
        trace!(worker = self.index, vid = %vipo.vid(), "ticking");
        vipo.tick(job)?;
        self.inspector.record_tick();
        self.executor.finish_job(vipo.vid())
    }
}
