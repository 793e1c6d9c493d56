//! Error types of the kernel.
//!
//! Contract violations are returned to the offending call site. Kernel
//! faults and escalated actor failures end up in the runtime's fatal slot.

use crate::actor::Failure;
use crate::id::Vid;
use crate::timing::TimerId;
use thiserror::Error;

/// Result type alias for kernel operations
pub type Result<T> = ::std::result::Result<T, Error>;

/// Everything that can go wrong in the kernel.
#[derive(Debug, Error)]
pub enum Error {
    // Contract violations
    /// `start` called twice.
    #[error("vipo {vid:#} is already started")]
    StartAfterStart { vid: Vid },

    /// `start` called after `destroy`.
    #[error("vipo {vid:#} cannot start after destroy was requested")]
    StartAfterDestroy { vid: Vid },

    /// `destroy` called before `start`.
    #[error("vipo {vid:#} cannot be destroyed before it is started")]
    DestroyBeforeStart { vid: Vid },

    /// Message addressed to `Vid::EMPTY`.
    #[error("vipo {vid:#} cannot send to the empty id")]
    SendToEmpty { vid: Vid },

    /// Message addressed to its own sender.
    #[error("vipo {vid:#} cannot send to itself")]
    SendToSelf { vid: Vid },

    /// Message sent once destruction was requested.
    #[error("vipo {vid:#} cannot send after destroy was requested")]
    SendAfterDestroy { vid: Vid },

    /// Timer unknown or already gone.
    #[error("vipo {vid:#} has no timer {timer_id}")]
    NoSuchTimer { vid: Vid, timer_id: TimerId },

    /// Id parts out of range.
    #[error("invalid vid: {reason}")]
    InvalidVid { reason: String },

    // Kernel faults
    /// A kernel invariant broke. Fatal.
    #[error("kernel fault: {reason}")]
    KernelFault { reason: String },

    // Escalations
    /// A vipo failure its `on_error` did not handle. Fatal.
    #[error("vipo {vid:#} failed without handling: {failure}")]
    Unhandled { vid: Vid, failure: Failure },

    /// The virtual machine is no longer running.
    #[error("the virtual machine has ended")]
    Ended,

    /// A kernel thread could not be spawned.
    #[error("failed to spawn kernel thread: {0}")]
    Spawn(#[from] ::std::io::Error),
}

impl Error {
    pub(crate) fn kernel_fault<S: Into<String>>(reason: S) -> Error {
        Error::KernelFault {
            reason: reason.into(),
        }
    }

    /// Caller misuse, reported synchronously.
    pub fn is_contract_violation(&self) -> bool {
        match self {
            Error::StartAfterStart { .. }
            | Error::StartAfterDestroy { .. }
            | Error::DestroyBeforeStart { .. }
            | Error::SendToEmpty { .. }
            | Error::SendToSelf { .. }
            | Error::SendAfterDestroy { .. }
            | Error::NoSuchTimer { .. }
            | Error::InvalidVid { .. } => true,
            _ => false,
        }
    }

    /// A broken kernel invariant. Always fatal.
    pub fn is_kernel_fault(&self) -> bool {
        match self {
            Error::KernelFault { .. } => true,
            _ => false,
        }
    }
}
