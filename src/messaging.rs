use crate::id::Vid;
use crate::timing::TimerId;
use std::any::Any;
use std::sync::Arc;

/// Opaque value handed back to the application by schedule and timer
/// messages.
pub type Context = Arc<dyn Any + Send + Sync>;

/// Application payload of a user message.
pub struct Payload {
    value: Box<dyn Any + Send>,
    type_name: &'static str,
}

impl Payload {
    /// Box `value`, remembering its type name.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Payload {
            value: Box::new(value),
            type_name: ::std::any::type_name::<T>(),
        }
    }

    /// Whether the value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Borrow the value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Type name of the boxed value, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl ::std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "Payload({})", self.type_name)
    }
}

/// What an envelope carries.
#[derive(Debug)]
pub enum Message {
    /// Produced by [`Vipo::schedule`](struct.Vipo.html#method.schedule).
    Schedule { context: Option<Context> },
    /// A timer of the receiving vipo came due.
    Timer {
        timer_id: TimerId,
        context: Option<Context>,
    },
    /// Sent by another vipo.
    User(Payload),
}

impl Message {
    /// Wrap `value` as a user message.
    pub fn user<T: Any + Send>(value: T) -> Self {
        Message::User(Payload::new(value))
    }

    /// Whether the kernel produced this message.
    pub fn is_system(&self) -> bool {
        match self {
            Message::User(_) => false,
            _ => true,
        }
    }

    /// Borrow the user payload as `T`, if this is a user message of that type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Message::User(payload) => payload.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// A message on its way from one vipo to another. Immutable once built.
#[derive(Debug)]
pub struct Envelope {
    from: Vid,
    to: Vid,
    message: Message,
}

impl Envelope {
    /// An envelope from `from` to `to`.
    pub fn new(from: Vid, to: Vid, message: Message) -> Self {
        Envelope { from, to, message }
    }

    /// Kernel-originated message: the sender is the empty id.
    pub(crate) fn system(to: Vid, message: Message) -> Self {
        Envelope {
            from: Vid::EMPTY,
            to,
            message,
        }
    }

    /// The sender. Empty for kernel messages.
    pub fn from(&self) -> &Vid {
        &self.from
    }

    /// The recipient.
    pub fn to(&self) -> &Vid {
        &self.to
    }

    /// The carried message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Unwrap the carried message.
    pub fn into_message(self) -> Message {
        self.message
    }

    /// Borrow the user payload as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.message.downcast_ref::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping(u32);

    #[test]
    fn user_payload_downcasts() {
        let message = Message::user(Ping(3));
        assert!(!message.is_system());
        assert_eq!(message.downcast_ref::<Ping>().map(|ping| ping.0), Some(3));
        assert!(message.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn system_envelopes_come_from_nobody() {
        let to = Vid::new(1, 9).unwrap();
        let envelope = Envelope::system(to.clone(), Message::Schedule { context: None });
        assert!(envelope.from().is_empty());
        assert_eq!(envelope.to(), &to);
        assert!(envelope.message().is_system());
        assert!(envelope.downcast_ref::<Ping>().is_none());
    }
}
