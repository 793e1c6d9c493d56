//! Actor logic written as a sequence of waits instead of a tick handler.
//!
//! A [`Procedure`] queues waits on its [`Flow`]: "resume me with the next
//! message like this", "resume me in 50ms", "let me react to messages until
//! I say stop". Every job of the vipo is replayed against the pending waits
//! in order. The first wait that accepts a message is taken off the queue
//! and resumed, and may queue further waits. Messages no wait accepts are
//! dropped. Once no wait is left, the procedure is over and the vipo
//! destroys itself.
//!
//! ```ignore
//! struct Echo;
//!
//! impl Procedure for Echo {
//!     fn begin(&mut self, flow: &mut Flow<Self>, _world: &mut World) -> Result<(), Failure> {
//!         flow.receive(|_echo, envelope, _flow, world| {
//!             let reply = envelope.downcast_ref::<String>().cloned().unwrap_or_default();
//!             world.send(envelope.from(), reply)?;
//!             Ok(())
//!         });
//!         Ok(())
//!     }
//! }
//! ```

use crate::actor::{Actor, ErrorHandling, Failure};
use crate::id::Vid;
use crate::job::VipoJob;
use crate::messaging::{Envelope, Message};
use crate::timing::TimerId;
use crate::world::World;
use std::any::Any;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{trace, warn};

type Filter = Box<dyn Fn(&Envelope) -> bool + Send>;
type Resume<P> = Box<
    dyn FnOnce(&mut P, Option<&Envelope>, &mut Flow<P>, &mut World) -> Result<(), Failure> + Send,
>;
type Reaction<P> = Box<
    dyn FnMut(&mut P, &Envelope, &mut Flow<P>, &mut World) -> Result<bool, Failure> + Send,
>;
type Begin = Box<dyn FnOnce(&mut Flow<Script>, &mut World) -> Result<(), Failure> + Send>;

enum Wait<P> {
    Receive {
        filter: Option<Filter>,
        deadline: Option<TimerId>,
        then: Resume<P>,
    },
    React(Reaction<P>),
    Sleep {
        timer: TimerId,
        then: Resume<P>,
    },
}

impl<P> Wait<P> {
    fn timer(&self) -> Option<TimerId> {
        match self {
            Wait::Receive { deadline, .. } => *deadline,
            Wait::Sleep { timer, .. } => Some(*timer),
            Wait::React(_) => None,
        }
    }

    fn accepts(&self, envelope: &Envelope) -> bool {
        match self {
            Wait::Receive { filter, .. } => {
                filter.as_ref().map_or(true, |filter| filter(envelope))
            }
            Wait::React(_) => true,
            Wait::Sleep { .. } => false,
        }
    }
}

fn fired_timer(envelope: &Envelope) -> Option<TimerId> {
    match envelope.message() {
        Message::Timer { timer_id, .. } if envelope.from().is_empty() => Some(*timer_id),
        _ => None,
    }
}

/// The pending waits of a procedure.
pub struct Flow<P> {
    waits: VecDeque<Wait<P>>,
}

impl<P: 'static> Flow<P> {
    fn new() -> Self {
        Flow {
            waits: VecDeque::new(),
        }
    }

    /// Resume with the next message.
    pub fn receive<F>(&mut self, then: F)
    where
        F: FnOnce(&mut P, &Envelope, &mut Flow<P>, &mut World) -> Result<(), Failure>
            + Send
            + 'static,
    {
        self.push_receive(None, None, then);
    }

    /// Resume with the next user message of type `M` and its sender.
    pub fn receive_of<M, F>(&mut self, then: F)
    where
        M: Any + Send,
        F: FnOnce(&mut P, &Vid, &M, &mut Flow<P>, &mut World) -> Result<(), Failure>
            + Send
            + 'static,
    {
        self.push_receive(
            Some(Box::new(|envelope: &Envelope| {
                envelope.downcast_ref::<M>().is_some()
            })),
            None,
            move |procedure: &mut P, envelope: &Envelope, flow: &mut Flow<P>, world: &mut World| {
                match envelope.downcast_ref::<M>() {
                    Some(message) => then(procedure, envelope.from(), message, flow, world),
                    None => Ok(()),
                }
            },
        );
    }

    /// Resume with the next message `filter` accepts.
    pub fn receive_where<M, F>(&mut self, filter: M, then: F)
    where
        M: Fn(&Envelope) -> bool + Send + 'static,
        F: FnOnce(&mut P, &Envelope, &mut Flow<P>, &mut World) -> Result<(), Failure>
            + Send
            + 'static,
    {
        self.push_receive(Some(Box::new(filter)), None, then);
    }

    /// Like `receive_where`, but gives up after `timeout` and resumes with
    /// `None`.
    pub fn receive_within<M, F>(
        &mut self,
        world: &mut World,
        timeout: Duration,
        filter: M,
        then: F,
    ) where
        M: Fn(&Envelope) -> bool + Send + 'static,
        F: FnOnce(&mut P, Option<&Envelope>, &mut Flow<P>, &mut World) -> Result<(), Failure>
            + Send
            + 'static,
    {
        let deadline = world.create_timer(timeout, Duration::from_secs(0), None);
        self.waits.push_back(Wait::Receive {
            filter: Some(Box::new(filter)),
            deadline: Some(deadline),
            then: Box::new(then),
        });
    }

    fn push_receive<F>(&mut self, filter: Option<Filter>, deadline: Option<TimerId>, then: F)
    where
        F: FnOnce(&mut P, &Envelope, &mut Flow<P>, &mut World) -> Result<(), Failure>
            + Send
            + 'static,
    {
        self.waits.push_back(Wait::Receive {
            filter,
            deadline,
            then: Box::new(
                move |procedure: &mut P,
                      envelope: Option<&Envelope>,
                      flow: &mut Flow<P>,
                      world: &mut World| match envelope {
                    Some(envelope) => then(procedure, envelope, flow, world),
                    None => Ok(()),
                },
            ),
        });
    }

    /// Feed every message to `react` until it returns `false`.
    pub fn react<F>(&mut self, react: F)
    where
        F: FnMut(&mut P, &Envelope, &mut Flow<P>, &mut World) -> Result<bool, Failure>
            + Send
            + 'static,
    {
        self.waits.push_back(Wait::React(Box::new(react)));
    }

    /// Resume after `delay`. Does not consume any message.
    pub fn sleep<F>(&mut self, world: &mut World, delay: Duration, then: F)
    where
        F: FnOnce(&mut P, &mut Flow<P>, &mut World) -> Result<(), Failure> + Send + 'static,
    {
        let timer = world.create_timer(delay, Duration::from_secs(0), None);
        self.waits.push_back(Wait::Sleep {
            timer,
            then: Box::new(
                move |procedure: &mut P,
                      _: Option<&Envelope>,
                      flow: &mut Flow<P>,
                      world: &mut World| { then(procedure, flow, world) },
            ),
        });
    }

    /// Waits not resumed yet.
    pub fn pending(&self) -> usize {
        self.waits.len()
    }

    /// Whether the procedure is over.
    pub fn is_empty(&self) -> bool {
        self.waits.is_empty()
    }

    fn clear(&mut self, world: &mut World) {
        for wait in self.waits.drain(..) {
            if let Some(timer) = wait.timer() {
                // may already have fired
                let _ = world.destroy_timer(timer);
            }
        }
    }

    /// Timer messages go to the wait owning the timer; anything else to the
    /// first wait that accepts it.
    fn route(&self, envelope: &Envelope) -> Option<(usize, bool)> {
        if let Some(fired) = fired_timer(envelope) {
            let owner = self.waits.iter().position(|wait| wait.timer() == Some(fired));
            if let Some(index) = owner {
                return Some((index, true));
            }
        }
        self.waits
            .iter()
            .position(|wait| wait.accepts(envelope))
            .map(|index| (index, false))
    }

    fn deliver(
        &mut self,
        procedure: &mut P,
        envelope: &Envelope,
        world: &mut World,
    ) -> Result<(), Failure> {
        let (index, timed_out) = match self.route(envelope) {
            Some(route) => route,
            None => {
                trace!(from = %envelope.from(), "no wait for message");
                return Ok(());
            }
        };
        let wait = match self.waits.remove(index) {
            Some(wait) => wait,
            None => return Ok(()),
        };

        match wait {
            Wait::Receive { deadline, then, .. } => {
                if timed_out {
                    then(procedure, None, self, world)
                } else {
                    if let Some(deadline) = deadline {
                        let _ = world.destroy_timer(deadline);
                    }
                    then(procedure, Some(envelope), self, world)
                }
            }
            Wait::Sleep { then, .. } => then(procedure, None, self, world),
            Wait::React(mut react) => {
                if react(procedure, envelope, self, world)? {
                    let index = index.min(self.waits.len());
                    self.waits.insert(index, Wait::React(react));
                }
                Ok(())
            }
        }
    }
}

/// Logic run through a [`Sequential`] vipo.
pub trait Procedure: Sized + Send + 'static {
    /// Called from `on_start`. Queue the first waits here.
    fn begin(&mut self, flow: &mut Flow<Self>, world: &mut World) -> Result<(), Failure>;

    /// The procedure is aborted before this is called.
    fn on_error(&mut self, _failure: &Failure, _world: &mut World) -> ErrorHandling {
        ErrorHandling::Unhandled
    }

    /// Called once the last wait was resumed.
    fn on_finish(&mut self, _world: &mut World) {}
}

/// A procedure without state of its own, written as one closure that
/// queues the first waits. See [`Sequential::from_fn`].
pub struct Script {
    begin: Option<Begin>,
}

impl Procedure for Script {
    fn begin(&mut self, flow: &mut Flow<Self>, world: &mut World) -> Result<(), Failure> {
        match self.begin.take() {
            Some(begin) => begin(flow, world),
            None => Ok(()),
        }
    }
}

impl Sequential<Script> {
    /// Run `begin` as the whole procedure. State lives in the closures.
    pub fn from_fn<F>(begin: F) -> Self
    where
        F: FnOnce(&mut Flow<Script>, &mut World) -> Result<(), Failure> + Send + 'static,
    {
        Sequential::new(Script {
            begin: Some(Box::new(begin)),
        })
    }
}

/// Runs a [`Procedure`] as an actor.
pub struct Sequential<P: Procedure> {
    procedure: P,
    flow: Flow<P>,
    finished: bool,
}

impl<P: Procedure> Sequential<P> {
    /// Wrap `procedure`. It begins once the vipo starts.
    pub fn new(procedure: P) -> Self {
        Sequential {
            procedure,
            flow: Flow::new(),
            finished: false,
        }
    }

    fn finish(&mut self, world: &mut World) -> Result<(), Failure> {
        self.finished = true;
        self.procedure.on_finish(world);
        trace!(vid = %world.vid(), "procedure finished");
        world.destroy()?;
        Ok(())
    }
}

impl<P: Procedure> Actor for Sequential<P> {
    fn on_start(&mut self, world: &mut World) -> Result<(), Failure> {
        self.procedure.begin(&mut self.flow, world)?;
        if self.flow.is_empty() {
            self.finish(world)?;
        }
        Ok(())
    }

    fn on_tick(&mut self, job: &VipoJob, world: &mut World) -> Result<(), Failure> {
        if self.finished {
            return Ok(());
        }
        for envelope in job.messages() {
            if self.flow.is_empty() {
                break;
            }
            self.flow.deliver(&mut self.procedure, envelope, world)?;
        }
        if self.flow.is_empty() {
            self.finish(world)?;
        }
        Ok(())
    }

    fn on_error(&mut self, failure: &Failure, world: &mut World) -> ErrorHandling {
        if !self.finished {
            self.flow.clear(world);
            self.finished = true;
            if let Err(err) = world.destroy() {
                warn!(error = %err, "aborted procedure could not destroy its vipo");
            }
        }
        self.procedure.on_error(failure, world)
    }
}
