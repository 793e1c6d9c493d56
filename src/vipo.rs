use crate::actor::{Actor, ErrorHandling, Failure};
use crate::controller::Controller;
use crate::coordinator::{self, Signal};
use crate::error::Error;
use crate::id::Vid;
use crate::inspector::Inspector;
use crate::job::VipoJob;
use crate::messaging::Context;
use crate::registry::Registry;
use crate::timing::{self, TimingComponent};
use crate::world::World;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, trace, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    NotRequested,
    Requested,
    Done,
}

#[derive(Copy, Clone, Debug)]
struct Lifecycle {
    start: Phase,
    destroy: Phase,
}

/// Observable lifecycle stage of a [`Vipo`](struct.Vipo.html).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Created, `start` not called yet.
    NotStarted,
    /// `start` called, `on_start` not run yet.
    StartRequested,
    /// `on_start` has run.
    Running,
    /// `destroy` called, the terminal tick has not run yet.
    DestroyRequested,
    /// Terminal. The vipo is detached or about to be.
    Destroyed,
}

impl Lifecycle {
    fn stage(&self) -> Stage {
        match (self.start, self.destroy) {
            (_, Phase::Done) => Stage::Destroyed,
            (_, Phase::Requested) => Stage::DestroyRequested,
            (Phase::NotRequested, _) => Stage::NotStarted,
            (Phase::Requested, _) => Stage::StartRequested,
            (Phase::Done, _) => Stage::Running,
        }
    }
}

/// Where a vipo sends its requests.
pub(crate) struct Links {
    pub requests: Sender<coordinator::Request>,
    pub timing: Sender<timing::Request>,
    pub controller: Arc<Controller>,
    pub inspector: Arc<Inspector>,
    pub registry: Weak<Registry>,
}

struct Slot {
    actor: Box<dyn Actor>,
    timers: TimingComponent,
}

struct VipoInner {
    vid: Vid,
    lifecycle: Mutex<Lifecycle>,
    // held for the whole tick; never contended while affinity holds
    slot: Mutex<Slot>,
    links: Links,
}

impl Drop for VipoInner {
    fn drop(&mut self) {
        // a started vipo gives its id back when it detaches
        if self.lifecycle.get_mut().start == Phase::NotRequested {
            if let Some(registry) = self.links.registry.upgrade() {
                registry.release(&self.vid);
            }
        }
    }
}

/// Handle to a virtual process: an actor plus its lifecycle.
///
/// Cheap to clone. `start`, `schedule` and `destroy` may be called from any
/// thread. Each turns into at most one request to the coordinator, so
/// redundant calls never produce redundant ticks.
#[derive(Clone)]
pub struct Vipo {
    inner: Arc<VipoInner>,
}

/// Reference that does not keep a vipo alive.
#[derive(Clone)]
pub(crate) struct WeakVipo {
    inner: Weak<VipoInner>,
}

impl WeakVipo {
    pub fn upgrade(&self) -> Option<Vipo> {
        self.inner.upgrade().map(|inner| Vipo { inner })
    }
}

impl Vipo {
    pub(crate) fn new(vid: Vid, actor: Box<dyn Actor>, links: Links) -> Vipo {
        Vipo {
            inner: Arc::new(VipoInner {
                vid,
                lifecycle: Mutex::new(Lifecycle {
                    start: Phase::NotRequested,
                    destroy: Phase::NotRequested,
                }),
                slot: Mutex::new(Slot {
                    actor,
                    timers: TimingComponent::new(),
                }),
                links,
            }),
        }
    }

    /// The id this vipo is addressed by.
    pub fn vid(&self) -> &Vid {
        &self.inner.vid
    }

    /// Snapshot of the lifecycle stage.
    pub fn stage(&self) -> Stage {
        self.inner.lifecycle.lock().stage()
    }

    /// Whether the terminal tick has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.lifecycle.lock().destroy == Phase::Done
    }

    pub(crate) fn destroy_requested(&self) -> bool {
        self.inner.lifecycle.lock().destroy != Phase::NotRequested
    }

    /// Attach to the virtual machine and get `on_start` called.
    ///
    /// Fails when called twice, after `destroy`, or once the virtual machine
    /// has ended.
    pub fn start(&self) -> Result<(), Error> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.destroy != Phase::NotRequested {
            return Err(Error::StartAfterDestroy {
                vid: self.vid().clone(),
            });
        }
        if lifecycle.start != Phase::NotRequested {
            return Err(Error::StartAfterStart {
                vid: self.vid().clone(),
            });
        }
        // sent under the lock so requests reach the coordinator in
        // lifecycle order
        self.submit(Signal::Start)?;
        lifecycle.start = Phase::Requested;
        Ok(())
    }

    /// Get a tick with a schedule message. Ignored before `start` and once
    /// `destroy` was requested.
    pub fn schedule(&self) {
        self.schedule_signal(None)
    }

    /// Like `schedule`, with `context` carried by the schedule message.
    pub fn schedule_with(&self, context: Context) {
        self.schedule_signal(Some(context))
    }

    fn schedule_signal(&self, context: Option<Context>) {
        let lifecycle = self.inner.lifecycle.lock();
        if lifecycle.start == Phase::NotRequested || lifecycle.destroy != Phase::NotRequested {
            trace!(vid = %self.vid(), stage = ?lifecycle.stage(), "ignoring schedule");
            return;
        }
        if self.submit(Signal::Schedule(context)).is_err() {
            trace!(vid = %self.vid(), "ignoring schedule, virtual machine ended");
        }
    }

    /// Get `on_destroy` called in a final tick, then detach.
    ///
    /// Fails before `start`; repeated calls are ignored.
    pub fn destroy(&self) -> Result<(), Error> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.start == Phase::NotRequested {
            return Err(Error::DestroyBeforeStart {
                vid: self.vid().clone(),
            });
        }
        if lifecycle.destroy != Phase::NotRequested {
            return Ok(());
        }
        self.submit(Signal::Destroy)?;
        lifecycle.destroy = Phase::Requested;
        Ok(())
    }

    fn submit(&self, signal: Signal) -> Result<(), Error> {
        self.send_request(coordinator::Request::Schedule {
            vipo: self.clone(),
            signal,
        })
    }

    fn send_request(&self, request: coordinator::Request) -> Result<(), Error> {
        self.inner
            .links
            .requests
            .send(request)
            .map_err(|_| Error::Ended)
    }

    pub(crate) fn ptr_eq(&self, other: &Vipo) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakVipo {
        WeakVipo {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Run one job. Only the worker the executor bound this vipo to calls
    /// this, so a contended slot means affinity was broken.
    pub(crate) fn tick(&self, mut job: VipoJob) -> Result<(), Error> {
        let vid = self.vid();
        let mut slot = self.inner.slot.try_lock().ok_or_else(|| {
            Error::kernel_fault(format!("vipo {:#} ticked concurrently", vid))
        })?;

        if self.is_destroyed() {
            trace!(vid = %vid, "discarding job of destroyed vipo");
            self.inner.links.inspector.discard(job.messages().len());
            return Ok(());
        }
        if job.is_empty() {
            return Err(Error::kernel_fault(format!(
                "vipo {:#} ticked without content",
                vid
            )));
        }

        let Slot { actor, timers } = &mut *slot;
        let messages = job.take_messages();
        job.set_messages(timers.accept(messages, vid, Instant::now()));

        let mut world = World::new(self, timers);
        if !job.is_empty() {
            trace!(vid = %vid, messages = job.messages().len(), "tick");
            if let Err(failure) = self.run_callbacks(actor.as_mut(), &job, &mut world) {
                self.handle_failure(actor.as_mut(), failure, &mut world);
            }
        }
        let outgoing = world.into_outgoing();

        if job.destroy_requested() {
            self.inner.lifecycle.lock().destroy = Phase::Done;
            timers.clear();
        }

        if !outgoing.is_empty() {
            self.send_request(coordinator::Request::Dispatch(outgoing))?;
        }
        if let Some(change) = timers.pending_change() {
            let request = timing::Request::from_change(vid, self.downgrade(), change);
            self.inner
                .links
                .timing
                .send(request)
                .map_err(|_| Error::Ended)?;
        }
        if job.destroy_requested() {
            self.send_request(coordinator::Request::Detach(self.clone()))?;
            debug!(vid = %vid, "vipo destroyed");
        }
        Ok(())
    }

    /// Run `on_destroy` of a vipo the virtual machine releases at
    /// shutdown. Only called once every kernel thread has been joined, on
    /// the thread that shuts down. Sends are refused.
    pub(crate) fn dispose(&self) {
        let vid = self.vid();
        let mut slot = match self.inner.slot.try_lock() {
            Some(slot) => slot,
            None => {
                warn!(vid = %vid, "vipo still ticking at shutdown, not disposed");
                return;
            }
        };
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.destroy == Phase::Done {
                return;
            }
            lifecycle.destroy = Phase::Done;
        }

        let Slot { actor, timers } = &mut *slot;
        timers.clear();
        let mut world = World::new(self, timers);
        if let Err(failure) = guarded(|| actor.on_destroy(&mut world)) {
            warn!(vid = %vid, failure = %failure, "vipo failed while disposed");
        }
        let dropped = world.into_outgoing().len();
        if dropped > 0 {
            self.inner.links.inspector.discard(dropped);
        }
        debug!(vid = %vid, "vipo disposed");
    }

    fn run_callbacks(
        &self,
        actor: &mut dyn Actor,
        job: &VipoJob,
        world: &mut World,
    ) -> Result<(), Failure> {
        if job.start_requested() {
            let started = guarded(|| actor.on_start(world));
            self.inner.lifecycle.lock().start = Phase::Done;
            started?;
        }
        guarded(|| actor.on_tick(job, world))?;
        if job.destroy_requested() {
            guarded(|| actor.on_destroy(world))?;
        }
        Ok(())
    }

    fn handle_failure(&self, actor: &mut dyn Actor, failure: Failure, world: &mut World) {
        let vid = self.vid();
        let verdict = catch_unwind(AssertUnwindSafe(|| actor.on_error(&failure, world)));
        let failure = match verdict {
            Ok(ErrorHandling::Handled) => {
                warn!(vid = %vid, failure = %failure, "vipo failure handled");
                return;
            }
            Ok(ErrorHandling::Unhandled) => failure,
            Err(panic) => Failure::from_panic(panic),
        };
        self.inner.links.controller.handle_error(Error::Unhandled {
            vid: vid.clone(),
            failure,
        });
    }
}

fn guarded<F>(callback: F) -> Result<(), Failure>
where
    F: FnOnce() -> Result<(), Failure>,
{
    catch_unwind(AssertUnwindSafe(callback)).unwrap_or_else(|panic| Err(Failure::from_panic(panic)))
}

impl ::std::fmt::Debug for Vipo {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "Vipo({:#}, {:?})", self.vid(), self.stage())
    }
}
