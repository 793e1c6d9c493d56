use crate::error::Error;
use crate::executor::Executor;
use crate::id::Vid;
use crate::inspector::Inspector;
use crate::job::VipoJob;
use crate::messaging::{Context, Envelope, Message};
use crate::registry::Registry;
use crate::signal::EndSignal;
use crate::vipo::Vipo;
use crossbeam_channel::{select, Receiver, TryRecvError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Lifecycle signal carried by a schedule request.
pub(crate) enum Signal {
    Start,
    Schedule(Option<Context>),
    Destroy,
}

pub(crate) enum Request {
    /// Messages of one tick, in send order.
    Dispatch(Vec<Envelope>),
    /// Attaches `vipo` if needed.
    Schedule { vipo: Vipo, signal: Signal },
    /// Sent by a vipo at the end of its terminal tick.
    Detach(Vipo),
}

/// Jobs of one circle, in the order their vipos were first seen.
struct Circle {
    jobs: Vec<(Vipo, VipoJob)>,
    index: HashMap<Vid, usize>,
}

impl Circle {
    fn new() -> Self {
        Circle {
            jobs: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn job_for(&mut self, vipo: &Vipo) -> &mut VipoJob {
        let jobs = &mut self.jobs;
        let position = *self.index.entry(vipo.vid().clone()).or_insert_with(|| {
            jobs.push((vipo.clone(), VipoJob::new()));
            jobs.len() - 1
        });
        &mut self.jobs[position].1
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }

    fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Single thread turning requests into per-vipo jobs.
pub(crate) struct Coordinator {
    requests: Receiver<Request>,
    registry: Arc<Registry>,
    executor: Arc<Executor>,
    inspector: Arc<Inspector>,
    end: EndSignal,
    circle_budget: Duration,
}

impl Coordinator {
    pub fn new(
        requests: Receiver<Request>,
        registry: Arc<Registry>,
        executor: Arc<Executor>,
        inspector: Arc<Inspector>,
        end: EndSignal,
        circle_budget: Duration,
    ) -> Self {
        Coordinator {
            requests,
            registry,
            executor,
            inspector,
            end,
            circle_budget,
        }
    }

    /// Runs until the end signal. Returns `Error::Ended` on a regular stop.
    pub fn run(self) -> Result<(), Error> {
        loop {
            if self.end.is_ended() {
                return Err(Error::Ended);
            }

            let backlog = self.requests.len();
            let circle = self.collect()?;
            if circle.is_empty() {
                continue;
            }

            trace!(jobs = circle.len(), backlog, "circle");
            self.inspector.record_circle(circle.len(), backlog);
            self.executor.dispatch_jobs(circle.jobs)?;
        }
    }

    /// Accumulate one circle. Stops when the budget is spent, when there are
    /// as many jobs as idle workers, or when the queue runs dry. Blocks
    /// while nothing has been collected.
    fn collect(&self) -> Result<Circle, Error> {
        let mut circle = Circle::new();
        let mut deadline = None;

        loop {
            let request = match self.requests.try_recv() {
                Ok(request) => request,
                Err(TryRecvError::Empty) if circle.is_empty() => self.wait()?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(Error::Ended),
            };
            let budget = self.circle_budget;
            let deadline = *deadline.get_or_insert_with(|| Instant::now() + budget);

            self.apply(request, &mut circle)?;

            if !circle.is_empty()
                && (circle.len() >= self.executor.idle_workers() || Instant::now() >= deadline)
            {
                break;
            }
        }

        Ok(circle)
    }

    fn wait(&self) -> Result<Request, Error> {
        select! {
            recv(self.requests) -> request => request.map_err(|_| Error::Ended),
            recv(self.end.watch()) -> _ => Err(Error::Ended),
        }
    }

    fn apply(&self, request: Request, circle: &mut Circle) -> Result<(), Error> {
        match request {
            Request::Dispatch(envelopes) => {
                for envelope in envelopes {
                    match self.registry.get(envelope.to()) {
                        Some(vipo) => circle.job_for(&vipo).push(envelope),
                        None => {
                            trace!(
                                to = %envelope.to(),
                                from = %envelope.from(),
                                "dropping message to unknown vipo"
                            );
                            self.inspector.discard(1);
                        }
                    }
                }
            }
            Request::Schedule { vipo, signal } => {
                if self.registry.attach(&vipo)? {
                    trace!(vid = %vipo.vid(), "vipo attached");
                }
                let job = circle.job_for(&vipo);
                match signal {
                    Signal::Start => job.request_start(),
                    Signal::Destroy => job.request_destroy(),
                    Signal::Schedule(context) => job.push(Envelope::system(
                        vipo.vid().clone(),
                        Message::Schedule { context },
                    )),
                }
            }
            Request::Detach(vipo) => {
                if self.registry.detach(vipo.vid()).is_some() {
                    trace!(vid = %vipo.vid(), "vipo detached");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vipo::testing::detached_vipo;
    use crate::executor::Binding;
    use crossbeam_channel::{unbounded, Sender};

    type Queues = Vec<Receiver<Binding>>;

    fn coordinator(workers: usize) -> (Coordinator, Sender<Request>, Queues) {
        coordinator_with_budget(workers, Duration::from_secs(5))
    }

    fn coordinator_with_budget(
        workers: usize,
        budget: Duration,
    ) -> (Coordinator, Sender<Request>, Queues) {
        let (requests, request_rx) = unbounded();
        let (executor, queues) = Executor::new(workers);
        let coordinator = Coordinator::new(
            request_rx,
            Arc::new(Registry::new()),
            Arc::new(executor),
            Arc::new(Inspector::new(true)),
            EndSignal::new(),
            budget,
        );
        (coordinator, requests, queues)
    }

    fn started(vipo: Vipo) -> Request {
        Request::Schedule {
            vipo,
            signal: Signal::Start,
        }
    }

    #[test]
    fn batches_messages_per_vipo_in_order() {
        let (coordinator, requests, _queues) = coordinator(4);
        let (first, _first_links) = detached_vipo(1);
        let (second, _second_links) = detached_vipo(2);
        let sender = Vid::new(1, 3).unwrap();

        requests.send(started(first.clone())).unwrap();
        requests.send(started(second.clone())).unwrap();
        requests
            .send(Request::Dispatch(vec![
                Envelope::new(sender.clone(), first.vid().clone(), Message::user(1u8)),
                Envelope::new(sender.clone(), second.vid().clone(), Message::user(2u8)),
                Envelope::new(sender.clone(), first.vid().clone(), Message::user(3u8)),
            ]))
            .unwrap();

        let circle = coordinator.collect().unwrap();
        assert_eq!(circle.len(), 2);
        let (vipo, job) = &circle.jobs[0];
        assert!(vipo.ptr_eq(&first));
        assert!(job.start_requested());
        let values: Vec<u8> = job
            .messages()
            .iter()
            .map(|envelope| *envelope.downcast_ref::<u8>().unwrap())
            .collect();
        assert_eq!(values, vec![1, 3]);
    }

    #[test]
    fn unknown_recipients_are_discarded() {
        let (coordinator, requests, _queues) = coordinator(4);
        let (vipo, _links) = detached_vipo(1);
        requests.send(started(vipo.clone())).unwrap();
        requests
            .send(Request::Dispatch(vec![Envelope::new(
                vipo.vid().clone(),
                Vid::new(1, 9).unwrap(),
                Message::user(()),
            )]))
            .unwrap();

        coordinator.collect().unwrap();
        assert_eq!(coordinator.inspector.discarded_messages(), 1);
    }

    #[test]
    fn stops_at_idle_worker_count() {
        let (coordinator, requests, _queues) = coordinator(1);
        let (first, _first_links) = detached_vipo(1);
        let (second, _second_links) = detached_vipo(2);
        requests.send(started(first)).unwrap();
        requests.send(started(second)).unwrap();

        assert_eq!(coordinator.collect().unwrap().len(), 1);
        assert_eq!(coordinator.collect().unwrap().len(), 1);
    }

    #[test]
    fn stops_when_the_budget_is_spent() {
        let (coordinator, requests, _queues) =
            coordinator_with_budget(4, Duration::from_millis(0));
        let vipos: Vec<_> = (1..=3).map(detached_vipo).collect();
        for (vipo, _links) in &vipos {
            requests.send(started(vipo.clone())).unwrap();
        }

        // four idle workers, so only the budget ends these circles
        assert_eq!(coordinator.executor.idle_workers(), 4);
        for (vipo, _links) in &vipos {
            let circle = coordinator.collect().unwrap();
            assert_eq!(circle.len(), 1);
            assert!(circle.jobs[0].0.ptr_eq(vipo));
        }
        assert!(requests.is_empty());
    }

    #[test]
    fn detach_removes_membership() {
        let (coordinator, requests, _queues) = coordinator(4);
        let (vipo, _links) = detached_vipo(1);
        requests.send(started(vipo.clone())).unwrap();
        requests.send(Request::Detach(vipo.clone())).unwrap();
        requests.send(Request::Detach(vipo.clone())).unwrap();

        coordinator.collect().unwrap();
        assert!(!coordinator.registry.contains(vipo.vid()));
    }

    #[test]
    fn conflicting_attach_is_a_kernel_fault() {
        let (coordinator, requests, _queues) = coordinator(4);
        let (vipo, _links) = detached_vipo(1);
        let (impostor, _impostor_links) = detached_vipo(1);
        requests.send(started(vipo)).unwrap();
        requests.send(started(impostor)).unwrap();

        match coordinator.collect() {
            Err(err) => assert!(err.is_kernel_fault()),
            Ok(_) => panic!("impostor attached"),
        }
    }

    #[test]
    fn ends_with_the_signal() {
        let (coordinator, _requests, _queues) = coordinator(1);
        coordinator.end.end();
        match coordinator.run() {
            Err(Error::Ended) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
