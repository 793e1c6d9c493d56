//! `dvm` is an in-process actor kernel that multiplexes any number of virtual
//! processes ("vipos") onto a small, fixed pool of worker threads.
//!
//! A vipo is a piece of sequential logic implementing [`Actor`](trait.Actor.html).
//! It never runs concurrently with itself: everything sent to it between two
//! of its ticks is batched into one [`VipoJob`](struct.VipoJob.html), and the
//! executor keeps a vipo on one worker for as long as it has work in flight.
//!
//! Have a look at [`VirtualMachine`](struct.VirtualMachine.html),
//! [`Vipo`](struct.Vipo.html) and [`World`](struct.World.html) to understand
//! the main abstractions, and at [`sequential`](sequential/index.html) for
//! writing vipos as a sequence of waits.
//!
//! Current Shortcomings:
//!
//! * All queues are unbounded, overload shows up as latency
//! * Workers are picked by a racy least-loaded snapshot

#[cfg(feature = "serde-serialization")]
#[macro_use]
extern crate serde_derive;
#[cfg(feature = "serde-serialization")]
extern crate serde;

mod actor;
mod actor_system;
mod allocator;
mod controller;
mod coordinator;
mod error;
mod executor;
mod id;
mod inspector;
mod job;
mod messaging;
mod registry;
pub mod sequential;
mod signal;
mod timing;
mod tuning;
mod vipo;
mod worker;
mod world;

pub use self::actor::{Actor, BoxError, ErrorHandling, Failure};
pub use self::actor_system::VirtualMachine;
pub use self::allocator::{UsedVidQuery, VidAllocator};
pub use self::controller::VmState;
pub use self::error::{Error, Result};
pub use self::id::{ParseVidError, Vid, INDEX_BITS, MAX_INDEX, MAX_NODE_ID, NODE_ID_BITS};
pub use self::inspector::Inspector;
pub use self::job::VipoJob;
pub use self::messaging::{Context, Envelope, Message, Payload};
pub use self::signal::EndSignal;
pub use self::timing::TimerId;
pub use self::tuning::Tuning;
pub use self::vipo::{Stage, Vipo};
pub use self::world::World;
