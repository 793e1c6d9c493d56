#![allow(dead_code)]

use dvm::{Tuning, VirtualMachine};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Logs go to the test writer, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn vm(workers: usize) -> VirtualMachine {
    init_tracing();
    VirtualMachine::new(Tuning {
        workers,
        diagnostics: true,
        ..Tuning::default()
    })
    .unwrap()
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        ::std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
