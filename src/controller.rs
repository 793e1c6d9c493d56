use crate::error::Error;
use crate::signal::EndSignal;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Runtime state. Only ever moves forward.
#[cfg_attr(
    feature = "serde-serialization",
    derive(Serialize, Deserialize)
)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VmState {
    /// Accepting work.
    Running,
    /// End requested, threads are winding down.
    Ending,
    /// Every thread joined and every vipo released.
    Ended,
}

impl VmState {
    fn from_u8(value: u8) -> VmState {
        match value {
            0 => VmState::Running,
            1 => VmState::Ending,
            _ => VmState::Ended,
        }
    }
}

pub(crate) type ErrorHandler = Box<dyn Fn(&Error) + Send + Sync>;

/// Shared by every kernel thread: the end signal, the runtime state and
/// the single fatal error slot.
pub(crate) struct Controller {
    state: AtomicU8,
    end: EndSignal,
    fatal: Mutex<Option<Arc<Error>>>,
    handler: Mutex<Option<ErrorHandler>>,
}

impl Controller {
    pub fn new(end: EndSignal) -> Self {
        Controller {
            state: AtomicU8::new(VmState::Running as u8),
            end,
            fatal: Mutex::new(None),
            handler: Mutex::new(None),
        }
    }

    pub fn state(&self) -> VmState {
        VmState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn end_signal(&self) -> &EndSignal {
        &self.end
    }

    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.fatal.lock().clone()
    }

    pub fn set_handler(&self, handler: ErrorHandler) {
        *self.handler.lock() = Some(handler);
    }

    /// Running -> Ending, once. Also covers an end signal tripped from the
    /// outside: threads call this when their waits unwind.
    pub fn request_to_end(&self) {
        let switched = self
            .state
            .compare_exchange(
                VmState::Running as u8,
                VmState::Ending as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if switched {
            debug!("virtual machine ending");
        }
        self.end.end();
    }

    pub fn mark_ended(&self) {
        self.state.store(VmState::Ended as u8, Ordering::SeqCst);
    }

    /// First error wins, later ones are only logged.
    pub fn handle_error(&self, err: Error) {
        let err = Arc::new(err);
        let first = {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(Arc::clone(&err));
                true
            } else {
                false
            }
        };

        if first {
            error!(error = %err, "fatal error, virtual machine ending");
            if let Some(handler) = self.handler.lock().as_ref() {
                handler(&err);
            }
        } else {
            debug!(error = %err, "dropping fatal error, slot already taken");
        }

        self.request_to_end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn first_error_wins() {
        let controller = Controller::new(EndSignal::new());
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            controller.set_handler(Box::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        controller.handle_error(Error::kernel_fault("first"));
        controller.handle_error(Error::kernel_fault("second"));

        let fatal = controller.last_error().unwrap();
        assert_eq!(fatal.to_string(), "kernel fault: first");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), VmState::Ending);
        assert!(controller.end_signal().is_ended());
    }

    #[test]
    fn request_to_end_is_idempotent() {
        let controller = Controller::new(EndSignal::new());
        assert_eq!(controller.state(), VmState::Running);
        controller.request_to_end();
        controller.request_to_end();
        assert_eq!(controller.state(), VmState::Ending);
        controller.mark_ended();
        assert_eq!(controller.state(), VmState::Ended);
        assert!(controller.last_error().is_none());
    }
}
