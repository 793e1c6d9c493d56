use crate::error::Error;
use crate::id::{Vid, MAX_INDEX};
use std::sync::atomic::{AtomicU64, Ordering};

/// Answers whether an id is currently held by a live vipo.
pub trait UsedVidQuery {
    fn is_used(&self, vid: &Vid) -> bool;
}

/// Hands out ids from a wrapping cursor, skipping the zero index and any id
/// still in use.
pub struct VidAllocator {
    node_id: u16,
    max_index: u64,
    cursor: AtomicU64,
}

impl VidAllocator {
    /// `max_index` is an index mask and must be of the form `2^k - 1`.
    pub fn new(node_id: u16, max_index: u64, initial_index: u64) -> Result<Self, Error> {
        if max_index == 0 || max_index > MAX_INDEX || max_index & (max_index + 1) != 0 {
            return Err(Error::InvalidVid {
                reason: format!("index mask {:X} is not of the form 2^k - 1", max_index),
            });
        }
        // fails early on a zero node id
        Vid::new(node_id, 1)?;

        Ok(VidAllocator {
            node_id,
            max_index,
            cursor: AtomicU64::new(initial_index & max_index),
        })
    }

    /// Allocate a fresh id. Tries every index of the space once before
    /// declaring it exhausted, which is a kernel fault.
    pub fn allocate(&self, label: Option<&str>, used: &dyn UsedVidQuery) -> Result<Vid, Error> {
        for _ in 0..=self.max_index {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst).wrapping_add(1) & self.max_index;
            if index == 0 {
                continue;
            }

            let vid = Vid::new(self.node_id, index)?;
            if !used.is_used(&vid) {
                return Ok(match label {
                    Some(label) => vid.labeled(label),
                    None => vid,
                });
            }
        }

        Err(Error::kernel_fault("vid space exhausted"))
    }
}
