use crate::id::Vid;
use crate::messaging::{Context, Envelope, Message};
use std::time::{Duration, Instant};

/// Identifies a timer within its owning vipo.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u32);

impl TimerId {
    /// The numeric value, unique within the owning vipo.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_u32(id: u32) -> Self {
        TimerId(id)
    }
}

impl ::std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Timer {
    id: TimerId,
    due: Instant,
    /// Zero for one-shot timers.
    interval: Duration,
    context: Option<Context>,
}

impl Timer {
    /// Returns false once a one-shot timer is spent.
    fn advance(&mut self, now: Instant) -> bool {
        if self.interval == Duration::from_secs(0) {
            return false;
        }
        while self.due <= now {
            self.due += self.interval;
        }
        true
    }
}

/// What the timing thread has to learn after a tick.
#[derive(Debug)]
pub(crate) enum TimingChange {
    Update {
        due: Instant,
        timer_id: TimerId,
        context: Option<Context>,
    },
    Reset,
}

/// The timers of one vipo. Only touched by the tick that owns the vipo.
///
/// At most one timer, the nearest, is announced to the timing thread at a
/// time. When its fired message comes back, every other timer that is due
/// by then fires in the same batch.
#[derive(Default)]
pub(crate) struct TimingComponent {
    timers: Vec<Timer>,
    latest_id: u32,
    requested: Option<(Instant, TimerId)>,
}

impl TimingComponent {
    pub fn new() -> Self {
        TimingComponent::default()
    }

    pub fn create(
        &mut self,
        now: Instant,
        delay: Duration,
        interval: Duration,
        context: Option<Context>,
    ) -> TimerId {
        self.latest_id += 1;
        let id = TimerId(self.latest_id);
        self.timers.push(Timer {
            id,
            due: now + delay,
            interval,
            context,
        });
        id
    }

    pub fn destroy(&mut self, id: TimerId) -> bool {
        match self.timers.iter().position(|timer| timer.id == id) {
            Some(position) => {
                self.timers.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Filter a job's messages through the timers. Fired messages of timers
    /// that are gone or not due are dropped; fired timers are advanced or
    /// removed; other timers due by `now` are appended as fired messages.
    pub fn accept(&mut self, messages: Vec<Envelope>, owner: &Vid, now: Instant) -> Vec<Envelope> {
        let mut accepted = Vec::with_capacity(messages.len());
        let mut woken = false;

        for envelope in messages {
            let fired = match envelope.message() {
                Message::Timer { timer_id, .. } if envelope.from().is_empty() => Some(*timer_id),
                _ => None,
            };

            match fired {
                Some(timer_id) => {
                    woken = true;
                    if self.requested.map(|(_, requested)| requested) == Some(timer_id) {
                        // the timing thread forgets an entry once it fires it
                        self.requested = None;
                    }
                    if self.fire(timer_id, now) {
                        accepted.push(envelope);
                    }
                }
                None => accepted.push(envelope),
            }
        }

        if woken {
            let mut due: Vec<(Instant, TimerId, Option<Context>)> = self
                .timers
                .iter()
                .filter(|timer| timer.due <= now)
                .map(|timer| (timer.due, timer.id, timer.context.clone()))
                .collect();
            due.sort_by_key(|&(due, id, _)| (due, id));

            for (_, timer_id, context) in due {
                self.fire(timer_id, now);
                accepted.push(Envelope::system(
                    owner.clone(),
                    Message::Timer { timer_id, context },
                ));
            }
        }

        accepted
    }

    fn fire(&mut self, id: TimerId, now: Instant) -> bool {
        let position = match self
            .timers
            .iter()
            .position(|timer| timer.id == id && timer.due <= now)
        {
            Some(position) => position,
            None => return false,
        };
        if !self.timers[position].advance(now) {
            self.timers.remove(position);
        }
        true
    }

    /// The announcement to make, if the nearest due time changed since the
    /// last one.
    pub fn pending_change(&mut self) -> Option<TimingChange> {
        let nearest = self
            .timers
            .iter()
            .min_by_key(|timer| (timer.due, timer.id));

        match nearest {
            None => self.requested.take().map(|_| TimingChange::Reset),
            Some(timer) => {
                if self.requested == Some((timer.due, timer.id)) {
                    return None;
                }
                self.requested = Some((timer.due, timer.id));
                Some(TimingChange::Update {
                    due: timer.due,
                    timer_id: timer.id,
                    context: timer.context.clone(),
                })
            }
        }
    }
}
