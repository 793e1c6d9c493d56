//! Two vipos bouncing a counter back and forth, then reporting what the
//! kernel saw.
//!
//! Run with `RUST_LOG=dvm=debug` to watch the threads come and go.

use dvm::{Actor, Failure, Message, Tuning, Vid, VipoJob, VirtualMachine, World};
use crossbeam_channel::Sender;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

const ROUNDS: u32 = 100_000;

struct Ball(u32);

struct Player {
    done: Option<Sender<u32>>,
}

impl Actor for Player {
    fn on_tick(&mut self, job: &VipoJob, world: &mut World) -> Result<(), Failure> {
        for envelope in job.messages() {
            match envelope.message() {
                Message::Schedule { context } => {
                    let opponent = context
                        .as_ref()
                        .and_then(|context| context.downcast_ref::<Vid>())
                        .ok_or_else(|| Failure::msg("serve needs an opponent"))?;
                    world.send(opponent, Ball(0))?;
                }
                message => {
                    let ball = message
                        .downcast_ref::<Ball>()
                        .ok_or_else(|| Failure::msg("not a ball"))?;
                    if ball.0 >= ROUNDS {
                        if let Some(done) = self.done.take() {
                            let _ = done.send(ball.0);
                        }
                        world.destroy()?;
                        return Ok(());
                    }
                    world.send(envelope.from(), Ball(ball.0 + 1))?;
                }
            }
        }
        Ok(())
    }
}

fn main() -> Result<(), dvm::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let vm = VirtualMachine::new(Tuning {
        diagnostics: true,
        ..Tuning::default()
    })?;
    vm.on_error(|err| eprintln!("fatal: {}", err));

    let (done, finished) = crossbeam_channel::bounded(2);
    let ping = vm.create_labeled("ping", Player { done: Some(done.clone()) })?;
    let pong = vm.create_labeled("pong", Player { done: Some(done) })?;
    ping.start()?;
    pong.start()?;

    let started = Instant::now();
    ping.schedule_with(::std::sync::Arc::new(pong.vid().clone()));

    match finished.recv_timeout(Duration::from_secs(60)) {
        Ok(rounds) => info!(
            rounds,
            elapsed = ?started.elapsed(),
            "rally over"
        ),
        Err(_) => info!("rally did not finish"),
    }

    let inspector = vm.inspector();
    info!(
        workers = vm.workers_count(),
        circles = inspector.circles(),
        ticks = inspector.ticks(),
        max_circle_jobs = inspector.max_circle_jobs(),
        discarded = inspector.discarded_messages(),
        "kernel counters"
    );

    vm.shutdown();
    Ok(())
}
