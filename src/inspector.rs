use std::sync::atomic::{AtomicU64, Ordering};

/// Kernel counters. The discard counter is always maintained, the rest only
/// when the virtual machine was built with `diagnostics` on.
#[derive(Debug, Default)]
pub struct Inspector {
    enabled: bool,
    discarded_messages: AtomicU64,
    circles: AtomicU64,
    ticks: AtomicU64,
    max_circle_jobs: AtomicU64,
    max_request_backlog: AtomicU64,
}

impl Inspector {
    pub(crate) fn new(enabled: bool) -> Self {
        Inspector {
            enabled,
            ..Inspector::default()
        }
    }

    /// Whether the counters beyond the discard count are kept.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Messages dropped because their recipient was unknown or destroyed.
    pub fn discarded_messages(&self) -> u64 {
        self.discarded_messages.load(Ordering::Relaxed)
    }

    /// Circles handed to the executor.
    pub fn circles(&self) -> u64 {
        self.circles.load(Ordering::Relaxed)
    }

    /// Ticks run by all workers.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Most jobs handed to the executor by a single circle.
    pub fn max_circle_jobs(&self) -> u64 {
        self.max_circle_jobs.load(Ordering::Relaxed)
    }

    /// Longest coordinator queue observed at the start of a circle.
    pub fn max_request_backlog(&self) -> u64 {
        self.max_request_backlog.load(Ordering::Relaxed)
    }

    pub(crate) fn discard(&self, count: usize) {
        if count > 0 {
            self.discarded_messages
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_circle(&self, jobs: usize, backlog: usize) {
        if !self.enabled {
            return;
        }
        self.circles.fetch_add(1, Ordering::Relaxed);
        self.max_circle_jobs
            .fetch_max(jobs as u64, Ordering::Relaxed);
        self.max_request_backlog
            .fetch_max(backlog as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_tick(&self) {
        if self.enabled {
            self.ticks.fetch_add(1, Ordering::Relaxed);
        }
    }
}
