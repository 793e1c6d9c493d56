use crate::allocator::{UsedVidQuery, VidAllocator};
use crate::error::Error;
use crate::id::Vid;
use crate::vipo::Vipo;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct Members {
    attached: HashMap<Vid, Vipo>,
    // handed out by `reserve`, held until detach or until the never
    // started vipo is dropped
    reserved: HashSet<Vid>,
}

impl UsedVidQuery for Members {
    fn is_used(&self, vid: &Vid) -> bool {
        self.reserved.contains(vid) || self.attached.contains_key(vid)
    }
}

/// Membership map of attached vipos, plus every id handed out to a vipo
/// that is not attached yet.
///
/// Only the coordinator thread attaches and detaches. Everyone else gets
/// read access through the lock: lookups by id and the registered count.
#[derive(Default)]
pub(crate) struct Registry {
    members: RwLock<Members>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Allocate an id and hold it until `release` or `detach`. Allocation
    /// and reservation happen under one write lock, so two callers never
    /// get the same id.
    pub fn reserve(&self, allocator: &VidAllocator, label: Option<&str>) -> Result<Vid, Error> {
        let mut members = self.members.write();
        let vid = allocator.allocate(label, &*members)?;
        members.reserved.insert(vid.clone());
        Ok(vid)
    }

    /// Give back the id of a vipo that was never attached.
    pub fn release(&self, vid: &Vid) {
        self.members.write().reserved.remove(vid);
    }

    /// Idempotent. Attaching a different vipo under a member's id is a
    /// kernel fault.
    pub fn attach(&self, vipo: &Vipo) -> Result<bool, Error> {
        let mut members = self.members.write();
        if let Some(member) = members.attached.get(vipo.vid()) {
            if !member.ptr_eq(vipo) {
                return Err(Error::kernel_fault(format!(
                    "vid {:#} attached by two different vipos",
                    vipo.vid()
                )));
            }
            return Ok(false);
        }
        members.attached.insert(vipo.vid().clone(), vipo.clone());
        Ok(true)
    }

    /// Idempotent. Frees the id for reuse.
    pub fn detach(&self, vid: &Vid) -> Option<Vipo> {
        let mut members = self.members.write();
        members.reserved.remove(vid);
        members.attached.remove(vid)
    }

    pub fn get(&self, vid: &Vid) -> Option<Vipo> {
        self.members.read().attached.get(vid).cloned()
    }

    pub fn contains(&self, vid: &Vid) -> bool {
        self.members.read().attached.contains_key(vid)
    }

    pub fn len(&self) -> usize {
        self.members.read().attached.len()
    }

    pub fn drain(&self) -> Vec<Vipo> {
        let mut members = self.members.write();
        members.reserved.clear();
        members.attached.drain().map(|(_, vipo)| vipo).collect()
    }
}

impl UsedVidQuery for Registry {
    fn is_used(&self, vid: &Vid) -> bool {
        self.members.read().is_used(vid)
    }
}
