use crate::error::Error;
use crate::id::Vid;
use crate::messaging::{Context, Envelope, Message};
use crate::timing::{TimerId, TimingComponent};
use crate::vipo::Vipo;
use std::any::Any;
use std::time::{Duration, Instant};

/// The execution context of one tick.
///
/// Only exists while a worker runs a vipo's callbacks, which makes it the
/// proof that the caller is the vipo's own tick. Outgoing messages are
/// buffered here and leave as a single ordered dispatch when the tick ends.
pub struct World<'a> {
    vipo: &'a Vipo,
    timers: &'a mut TimingComponent,
    outgoing: Vec<Envelope>,
}

impl<'a> World<'a> {
    pub(crate) fn new(vipo: &'a Vipo, timers: &'a mut TimingComponent) -> Self {
        World {
            vipo,
            timers,
            outgoing: Vec::new(),
        }
    }

    /// Id of the ticking vipo.
    pub fn vid(&self) -> &Vid {
        self.vipo.vid()
    }

    /// Queue `message` for `to`. It leaves when the tick ends.
    pub fn send<M: Any + Send>(&mut self, to: &Vid, message: M) -> Result<(), Error> {
        self.send_message(to, Message::user(message))
    }

    /// Like `send`, with an already built message.
    pub fn send_message(&mut self, to: &Vid, message: Message) -> Result<(), Error> {
        let vid = self.vipo.vid();
        if to.is_empty() {
            return Err(Error::SendToEmpty { vid: vid.clone() });
        }
        if to == vid {
            return Err(Error::SendToSelf { vid: vid.clone() });
        }
        if self.vipo.destroy_requested() {
            return Err(Error::SendAfterDestroy { vid: vid.clone() });
        }
        self.outgoing
            .push(Envelope::new(vid.clone(), to.clone(), message));
        Ok(())
    }

    /// Messages buffered so far in this tick.
    pub fn pending_messages(&self) -> usize {
        self.outgoing.len()
    }

    /// Request this vipo's own destruction. `on_destroy` runs in a later
    /// tick.
    pub fn destroy(&mut self) -> Result<(), Error> {
        self.vipo.destroy()
    }

    /// Fires after `delay`, then every `interval` unless that is zero.
    pub fn create_timer(
        &mut self,
        delay: Duration,
        interval: Duration,
        context: Option<Context>,
    ) -> TimerId {
        self.timers.create(Instant::now(), delay, interval, context)
    }

    /// Cancel a timer. A fired notice still in flight is dropped.
    pub fn destroy_timer(&mut self, timer_id: TimerId) -> Result<(), Error> {
        if self.timers.destroy(timer_id) {
            Ok(())
        } else {
            Err(Error::NoSuchTimer {
                vid: self.vipo.vid().clone(),
                timer_id,
            })
        }
    }

    /// Live timers of this vipo.
    pub fn timers_count(&self) -> usize {
        self.timers.len()
    }

    pub(crate) fn into_outgoing(self) -> Vec<Envelope> {
        self.outgoing
    }
}
