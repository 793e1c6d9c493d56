use crate::job::VipoJob;
use crate::world::World;

/// Boxed error returned by actor callbacks.
pub type BoxError = Box<dyn ::std::error::Error + Send + Sync>;

/// Why an actor callback did not complete.
#[derive(Debug)]
pub enum Failure {
    /// The callback returned an error.
    Error(BoxError),
    /// The callback panicked; carries the panic message.
    Panic(String),
}

impl Failure {
    /// A failure carrying just `message`.
    pub fn msg<M: ::std::fmt::Display>(message: M) -> Self {
        Failure::Error(message.to_string().into())
    }

    pub(crate) fn from_panic(panic: Box<dyn ::std::any::Any + Send>) -> Self {
        let message = if let Some(message) = panic.downcast_ref::<&'static str>() {
            (*message).to_owned()
        } else if let Some(message) = panic.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Failure::Panic(message)
    }

    /// Whether the callback panicked rather than returning an error.
    pub fn is_panic(&self) -> bool {
        match self {
            Failure::Panic(_) => true,
            Failure::Error(_) => false,
        }
    }
}

impl ::std::fmt::Display for Failure {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        match self {
            Failure::Error(err) => write!(f, "{}", err),
            Failure::Panic(message) => write!(f, "panicked: {}", message),
        }
    }
}

impl<E: ::std::error::Error + Send + Sync + 'static> From<E> for Failure {
    fn from(err: E) -> Self {
        Failure::Error(Box::new(err))
    }
}

/// Verdict of [`Actor::on_error`](trait.Actor.html#method.on_error).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorHandling {
    Handled,
    /// Escalate to the virtual machine's fatal error slot.
    Unhandled,
}

/// Must be implemented by every piece of logic run as a
/// [`Vipo`](struct.Vipo.html).
///
/// All callbacks run on a worker thread, never concurrently for the same
/// vipo. Errors returned (or panics raised) by `on_start`, `on_tick` and
/// `on_destroy` are handed to `on_error`.
pub trait Actor: Send + 'static {
    fn on_start(&mut self, _world: &mut World) -> Result<(), Failure> {
        Ok(())
    }

    /// Called once per job, with every message of the job in order.
    fn on_tick(&mut self, job: &VipoJob, world: &mut World) -> Result<(), Failure>;

    fn on_destroy(&mut self, _world: &mut World) -> Result<(), Failure> {
        Ok(())
    }

    /// The default escalates every failure.
    fn on_error(&mut self, _failure: &Failure, _world: &mut World) -> ErrorHandling {
        ErrorHandling::Unhandled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_std_errors() {
        let io = ::std::io::Error::new(::std::io::ErrorKind::Other, "disk gone");
        let failure: Failure = io.into();
        assert_eq!(failure.to_string(), "disk gone");
        assert!(!failure.is_panic());
    }

    #[test]
    fn reads_panic_payloads() {
        let failure = Failure::from_panic(Box::new("static message"));
        assert_eq!(failure.to_string(), "panicked: static message");

        let failure = Failure::from_panic(Box::new(String::from("owned")));
        assert!(failure.is_panic());
        assert_eq!(failure.to_string(), "panicked: owned");

        let failure = Failure::from_panic(Box::new(42u8));
        assert_eq!(failure.to_string(), "panicked: non-string panic payload");
    }
}
