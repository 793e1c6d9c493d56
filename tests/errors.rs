mod common;

use common::{vm, wait_until};
use dvm::{Actor, Error, ErrorHandling, Failure, Stage, Vid, VipoJob, VmState, World};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy)]
enum Fault {
    Returns,
    Panics,
}

struct Fragile {
    fault: Fault,
    verdict: ErrorHandling,
    errors: Arc<AtomicUsize>,
}

impl Actor for Fragile {
    fn on_tick(&mut self, job: &VipoJob, _world: &mut World) -> Result<(), Failure> {
        if job.messages().is_empty() {
            return Ok(());
        }
        match self.fault {
            Fault::Returns => Err(Failure::msg("fragile broke")),
            Fault::Panics => panic!("fragile panicked"),
        }
    }

    fn on_error(&mut self, _failure: &Failure, _world: &mut World) -> ErrorHandling {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.verdict
    }
}

#[test]
fn unhandled_failure_ends_the_machine() {
    let vm = vm(2);
    let notified = Arc::new(AtomicUsize::new(0));
    {
        let notified = Arc::clone(&notified);
        vm.on_error(move |_err| {
            notified.fetch_add(1, Ordering::SeqCst);
        });
    }

    let errors = Arc::new(AtomicUsize::new(0));
    let fragile = vm
        .create(Fragile {
            fault: Fault::Returns,
            verdict: ErrorHandling::Unhandled,
            errors: Arc::clone(&errors),
        })
        .unwrap();
    let bystander = vm
        .create(Fragile {
            fault: Fault::Returns,
            verdict: ErrorHandling::Unhandled,
            errors: Arc::new(AtomicUsize::new(0)),
        })
        .unwrap();
    fragile.start().unwrap();
    bystander.start().unwrap();
    fragile.schedule();

    assert!(wait_until(|| vm.state() != VmState::Running));
    match vm.last_error().as_deref() {
        Some(Error::Unhandled { vid, failure }) => {
            assert_eq!(vid, fragile.vid());
            assert_eq!(failure.to_string(), "fragile broke");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    // escalation does not tear other vipos down
    assert_ne!(bystander.stage(), Stage::Destroyed);
}

#[test]
fn handled_failure_stays_with_the_vipo() {
    let vm = vm(2);
    let errors = Arc::new(AtomicUsize::new(0));
    let fragile = vm
        .create(Fragile {
            fault: Fault::Panics,
            verdict: ErrorHandling::Handled,
            errors: Arc::clone(&errors),
        })
        .unwrap();
    fragile.start().unwrap();
    fragile.schedule();
    fragile.schedule();

    assert!(wait_until(|| errors.load(Ordering::SeqCst) >= 1));
    fragile.destroy().unwrap();
    assert!(wait_until(|| fragile.stage() == Stage::Destroyed));
    assert_eq!(vm.state(), VmState::Running);
    assert!(vm.last_error().is_none());
}

#[test]
fn panics_escalate_like_errors() {
    let vm = vm(1);
    let fragile = vm
        .create(Fragile {
            fault: Fault::Panics,
            verdict: ErrorHandling::Unhandled,
            errors: Arc::new(AtomicUsize::new(0)),
        })
        .unwrap();
    fragile.start().unwrap();
    fragile.schedule();

    assert!(wait_until(|| vm.last_error().is_some()));
    match vm.last_error().as_deref() {
        Some(Error::Unhandled { failure, .. }) => assert!(failure.is_panic()),
        other => panic!("unexpected {:?}", other),
    }
}

/// Tries every forbidden send and reports what it got back.
struct Rule {
    outcomes: Arc<Mutex<Vec<String>>>,
}

impl Actor for Rule {
    fn on_start(&mut self, world: &mut World) -> Result<(), Failure> {
        let own = world.vid().clone();
        let mut outcomes = self.outcomes.lock();
        for target in &[Vid::EMPTY, own] {
            match world.send(target, ()) {
                Err(err) if err.is_contract_violation() => outcomes.push(describe(&err)),
                other => outcomes.push(format!("unexpected {:?}", other)),
            }
        }
        world.destroy()?;
        if let Err(err) = world.send(&Vid::new(1, 0xFFFF).unwrap_or(Vid::EMPTY), ()) {
            outcomes.push(describe(&err));
        }
        Ok(())
    }

    fn on_tick(&mut self, _job: &VipoJob, _world: &mut World) -> Result<(), Failure> {
        Ok(())
    }
}

fn describe(err: &Error) -> String {
    match err {
        Error::SendToEmpty { .. } => "empty",
        Error::SendToSelf { .. } => "self",
        Error::SendAfterDestroy { .. } => "after destroy",
        _ => "other",
    }
    .to_owned()
}

#[test]
fn forbidden_sends_are_refused_synchronously() {
    let vm = vm(1);
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let rule = vm.create(Rule { outcomes: Arc::clone(&outcomes) }).unwrap();
    rule.start().unwrap();

    assert!(wait_until(|| rule.stage() == Stage::Destroyed));
    assert_eq!(*outcomes.lock(), vec!["empty", "self", "after destroy"]);
    assert_eq!(vm.discarded_messages(), 0);
    assert!(vm.last_error().is_none());
}
