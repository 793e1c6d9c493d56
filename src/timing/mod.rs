//! Timers.
//!
//! Each vipo keeps its own timers in a [`TimingComponent`] and only ever
//! announces its nearest one to the timing thread. The thread sleeps until
//! the earliest announced due time, then injects a fired timer message into
//! the coordinator like any other dispatch.

mod component;
mod table;

pub use self::component::TimerId;
pub(crate) use self::component::{TimingChange, TimingComponent};

use self::table::TimerTable;
use crate::coordinator;
use crate::error::Error;
use crate::id::Vid;
use crate::messaging::{Context, Envelope, Message};
use crate::signal::EndSignal;
use crate::vipo::WeakVipo;
use crossbeam_channel::{select, Receiver, Sender};
use std::time::Instant;
use tracing::trace;

pub(crate) enum Request {
    /// Replace the announcement of `vid`.
    Update {
        vid: Vid,
        due: Instant,
        timer_id: TimerId,
        context: Option<Context>,
        target: WeakVipo,
    },
    /// `vid` has no timers left.
    Reset { vid: Vid },
}

impl Request {
    pub fn from_change(vid: &Vid, target: WeakVipo, change: TimingChange) -> Request {
        match change {
            TimingChange::Update {
                due,
                timer_id,
                context,
            } => Request::Update {
                vid: vid.clone(),
                due,
                timer_id,
                context,
                target,
            },
            TimingChange::Reset => Request::Reset { vid: vid.clone() },
        }
    }
}

pub(crate) struct TimingThread {
    requests: Receiver<Request>,
    dispatch: Sender<coordinator::Request>,
    end: EndSignal,
    table: TimerTable,
}

impl TimingThread {
    pub fn new(
        requests: Receiver<Request>,
        dispatch: Sender<coordinator::Request>,
        end: EndSignal,
    ) -> Self {
        TimingThread {
            requests,
            dispatch,
            end,
            table: TimerTable::new(),
        }
    }

    /// Runs until the end signal. Returns `Error::Ended` on a regular stop.
    pub fn run(mut self) -> Result<(), Error> {
        loop {
            match self.wait()? {
                Some(request) => {
                    self.table.apply(request);
                    while let Ok(request) = self.requests.try_recv() {
                        self.table.apply(request);
                    }
                    trace!(pending = self.table.len(), "timer requests applied");
                }
                None => self.fire(Instant::now())?,
            }
        }
    }

    /// Blocks until a request arrives or the nearest entry is due. `None`
    /// means something is due.
    fn wait(&self) -> Result<Option<Request>, Error> {
        let timeout = match self.table.next_due() {
            None => None,
            Some(due) => {
                let now = Instant::now();
                if due <= now {
                    return Ok(None);
                }
                Some(due - now)
            }
        };

        let request = match timeout {
            None => select! {
                recv(self.requests) -> request => request,
                recv(self.end.watch()) -> _ => return Err(Error::Ended),
            },
            Some(timeout) => select! {
                recv(self.requests) -> request => request,
                recv(self.end.watch()) -> _ => return Err(Error::Ended),
                default(timeout) => return Ok(None),
            },
        };
        request.map(Some).map_err(|_| Error::Ended)
    }

    fn fire(&mut self, now: Instant) -> Result<(), Error> {
        for (vid, entry) in self.table.take_due(now) {
            let alive = entry
                .target
                .upgrade()
                .map_or(false, |vipo| !vipo.is_destroyed());
            if !alive {
                trace!(vid = %vid, timer = %entry.timer_id, "skipping timer of a gone vipo");
                continue;
            }

            trace!(vid = %vid, timer = %entry.timer_id, "timer fired");
            let fired = Envelope::system(
                vid,
                Message::Timer {
                    timer_id: entry.timer_id,
                    context: entry.context,
                },
            );
            self.dispatch
                .send(coordinator::Request::Dispatch(vec![fired]))
                .map_err(|_| Error::Ended)?;
        }
        Ok(())
    }
}
