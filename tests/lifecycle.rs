mod common;

use common::{vm, wait_until};
use dvm::{
    Actor, EndSignal, Error, Failure, Message, Stage, Tuning, VipoJob, VirtualMachine, VmState,
    World,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn note<S: Into<String>>(&self, entry: S) {
        self.0.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

struct Recorder {
    journal: Journal,
}

impl Actor for Recorder {
    fn on_start(&mut self, _world: &mut World) -> Result<(), Failure> {
        self.journal.note("start");
        Ok(())
    }

    fn on_tick(&mut self, job: &VipoJob, _world: &mut World) -> Result<(), Failure> {
        for envelope in job.messages() {
            if let Message::Schedule { context } = envelope.message() {
                let label = context
                    .as_ref()
                    .and_then(|context| context.downcast_ref::<&'static str>())
                    .copied()
                    .unwrap_or("none");
                self.journal.note(format!("schedule {}", label));
            }
        }
        Ok(())
    }

    fn on_destroy(&mut self, _world: &mut World) -> Result<(), Failure> {
        self.journal.note("destroy");
        Ok(())
    }
}

#[test]
fn runs_through_every_stage() {
    let vm = vm(2);
    let journal = Journal::default();
    let vipo = vm
        .create_labeled("recorder", Recorder { journal: journal.clone() })
        .unwrap();
    assert_eq!(vipo.stage(), Stage::NotStarted);
    assert_eq!(vipo.vid().label(), Some("recorder"));
    assert_eq!(vm.vipos_count(), 0);

    vipo.start().unwrap();
    assert!(wait_until(|| vipo.stage() == Stage::Running));
    assert_eq!(vm.vipos_count(), 1);
    assert!(vm.find(vipo.vid()).is_some());

    vipo.schedule_with(Arc::new("hello"));
    assert!(wait_until(|| journal.entries().len() == 2));

    vipo.destroy().unwrap();
    vipo.destroy().unwrap();
    vipo.schedule();
    assert!(wait_until(|| vipo.stage() == Stage::Destroyed));
    assert!(wait_until(|| vm.vipos_count() == 0));
    assert!(vm.find(vipo.vid()).is_none());

    assert_eq!(journal.entries(), vec!["start", "schedule hello", "destroy"]);
    assert!(vm.last_error().is_none());
}

#[test]
fn destroy_before_start_is_rejected() {
    let vm = vm(1);
    let vipo = vm
        .create(Recorder {
            journal: Journal::default(),
        })
        .unwrap();

    match vipo.destroy() {
        Err(Error::DestroyBeforeStart { vid }) => assert_eq!(&vid, vipo.vid()),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(vipo.stage(), Stage::NotStarted);
}

#[test]
fn start_twice_is_rejected() {
    let vm = vm(1);
    let vipo = vm
        .create(Recorder {
            journal: Journal::default(),
        })
        .unwrap();
    vipo.start().unwrap();
    assert!(vipo.start().unwrap_err().is_contract_violation());
}

/// Detects any overlap between two ticks of the same vipo.
struct Exclusive {
    ticking: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    schedules: Arc<AtomicUsize>,
    started: bool,
    ticks_before_start: Arc<AtomicUsize>,
}

impl Actor for Exclusive {
    fn on_start(&mut self, _world: &mut World) -> Result<(), Failure> {
        self.started = true;
        Ok(())
    }

    fn on_tick(&mut self, job: &VipoJob, _world: &mut World) -> Result<(), Failure> {
        if self.ticking.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if !self.started && !job.messages().is_empty() {
            self.ticks_before_start.fetch_add(1, Ordering::SeqCst);
        }
        self.schedules
            .fetch_add(job.messages().len(), Ordering::SeqCst);
        ::std::thread::yield_now();
        self.ticking.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn concurrent_schedules_never_overlap_ticks() {
    let vm = vm(4);
    let overlaps = Arc::new(AtomicUsize::new(0));
    let schedules = Arc::new(AtomicUsize::new(0));
    let ticks_before_start = Arc::new(AtomicUsize::new(0));
    let vipo = vm
        .create(Exclusive {
            ticking: Arc::new(AtomicBool::new(false)),
            overlaps: Arc::clone(&overlaps),
            schedules: Arc::clone(&schedules),
            started: false,
            ticks_before_start: Arc::clone(&ticks_before_start),
        })
        .unwrap();
    vipo.start().unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let vipo = vipo.clone();
            ::std::thread::spawn(move || {
                for _ in 0..250 {
                    vipo.schedule();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert!(wait_until(|| schedules.load(Ordering::SeqCst) == 1000));
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(ticks_before_start.load(Ordering::SeqCst), 0);
}

#[test]
fn many_vipos_each_tick_alone() {
    let vm = vm(3);
    let overlaps = Arc::new(AtomicUsize::new(0));
    let schedules = Arc::new(AtomicUsize::new(0));
    let ticks_before_start = Arc::new(AtomicUsize::new(0));

    let vipos: Vec<_> = (0..20)
        .map(|_| {
            vm.create(Exclusive {
                ticking: Arc::new(AtomicBool::new(false)),
                overlaps: Arc::clone(&overlaps),
                schedules: Arc::clone(&schedules),
                started: false,
                ticks_before_start: Arc::clone(&ticks_before_start),
            })
            .unwrap()
        })
        .collect();

    for vipo in &vipos {
        vipo.start().unwrap();
    }
    for _ in 0..50 {
        for vipo in &vipos {
            vipo.schedule();
        }
    }

    assert!(wait_until(|| schedules.load(Ordering::SeqCst) == 1000));
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(vm.vipos_count(), 20);
}

#[test]
fn shutdown_disposes_attached_vipos() {
    let vm = vm(2);
    let journal = Journal::default();
    let vipo = vm.create(Recorder { journal: journal.clone() }).unwrap();
    let idle = vm
        .create(Recorder {
            journal: Journal::default(),
        })
        .unwrap();
    vipo.start().unwrap();
    assert!(wait_until(|| vipo.stage() == Stage::Running));

    let signal = vm.end_signal();
    vm.shutdown();
    assert!(signal.is_ended());
    assert_eq!(vipo.stage(), Stage::Destroyed);
    assert_eq!(journal.entries(), vec!["start", "destroy"]);

    // the handles outlive the machine, calls are refused or ignored
    vipo.schedule();
    vipo.destroy().unwrap();
    match idle.start() {
        Err(Error::Ended) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(idle.stage(), Stage::NotStarted);
    assert_eq!(journal.entries(), vec!["start", "destroy"]);
}

#[test]
fn created_vipos_hold_their_ids() {
    common::init_tracing();
    let vm = VirtualMachine::new(Tuning {
        workers: 1,
        max_index: 1,
        ..Tuning::default()
    })
    .unwrap();

    let first = vm
        .create(Recorder {
            journal: Journal::default(),
        })
        .unwrap();
    drop(first);
    let second = vm
        .create(Recorder {
            journal: Journal::default(),
        })
        .unwrap();
    assert_eq!(second.vid().index(), 1);

    match vm.create(Recorder {
        journal: Journal::default(),
    }) {
        Err(err) => assert!(err.is_kernel_fault()),
        Ok(third) => panic!("{:?} shares an id with {:?}", third, second),
    }
    assert!(vm.last_error().map_or(false, |err| err.is_kernel_fault()));
}

#[test]
fn ending_stops_creation() {
    let vm = vm(1);
    assert_eq!(vm.state(), VmState::Running);
    vm.request_to_end();
    assert_ne!(vm.state(), VmState::Running);

    match vm.create(Recorder {
        journal: Journal::default(),
    }) {
        Err(Error::Ended) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn external_signal_ends_the_machine() {
    common::init_tracing();
    let external = EndSignal::new();
    let vm = VirtualMachine::with_end_signal(
        Tuning {
            workers: 1,
            ..Tuning::default()
        },
        &external,
    )
    .unwrap();

    external.end();
    assert!(wait_until(|| vm.state() != VmState::Running));
    vm.shutdown();
    assert!(external.is_ended());
}
