use crate::id::MAX_INDEX;
use std::time::Duration;

/// Construction parameters of a [`VirtualMachine`](struct.VirtualMachine.html).
#[derive(Clone, Debug)]
pub struct Tuning {
    /// Worker threads; 0 picks `available_parallelism() - 1` (at least 1).
    pub workers: usize,
    /// How long the coordinator may keep collecting requests into one circle.
    pub circle_budget: Duration,
    /// Maintain the optional [`Inspector`](struct.Inspector.html) counters.
    pub diagnostics: bool,
    /// Namespace tag of allocated ids.
    pub node_id: u16,
    /// Allocator index mask, of the form `2^k - 1`.
    pub max_index: u64,
    pub thread_name_prefix: String,
}

impl Tuning {
    pub(crate) fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        ::std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }
}

impl ::std::default::Default for Tuning {
    fn default() -> Self {
        Tuning {
            workers: 0,
            circle_budget: Duration::from_millis(1),
            diagnostics: false,
            node_id: 1,
            max_index: MAX_INDEX,
            thread_name_prefix: "dvm".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_worker_count_wins() {
        let tuning = Tuning {
            workers: 3,
            ..Tuning::default()
        };
        assert_eq!(tuning.worker_count(), 3);
    }

    #[test]
    fn automatic_worker_count_is_positive() {
        assert!(Tuning::default().worker_count() >= 1);
    }
}
