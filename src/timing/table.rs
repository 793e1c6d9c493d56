use super::{Request, TimerId};
use crate::id::Vid;
use crate::messaging::Context;
use crate::vipo::WeakVipo;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

pub(crate) struct Entry {
    pub due: Instant,
    pub timer_id: TimerId,
    pub context: Option<Context>,
    pub target: WeakVipo,
}

/// One outstanding notification per vipo, ordered by due time.
#[derive(Default)]
pub(crate) struct TimerTable {
    entries: HashMap<Vid, Entry>,
    order: BTreeSet<(Instant, Vid)>,
}

impl TimerTable {
    pub fn new() -> Self {
        TimerTable::default()
    }

    pub fn apply(&mut self, request: Request) {
        match request {
            Request::Update {
                vid,
                due,
                timer_id,
                context,
                target,
            } => {
                self.remove(&vid);
                self.order.insert((due, vid.clone()));
                self.entries.insert(
                    vid,
                    Entry {
                        due,
                        timer_id,
                        context,
                        target,
                    },
                );
            }
            Request::Reset { vid } => {
                self.remove(&vid);
            }
        }
    }

    fn remove(&mut self, vid: &Vid) -> Option<Entry> {
        let entry = self.entries.remove(vid)?;
        self.order.remove(&(entry.due, vid.clone()));
        Some(entry)
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.order.iter().next().map(|&(due, _)| due)
    }

    /// Remove and return every entry due by `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(Vid, Entry)> {
        let due: Vec<Vid> = self
            .order
            .iter()
            .take_while(|&&(due, _)| due <= now)
            .map(|(_, vid)| vid.clone())
            .collect();

        due.into_iter()
            .filter_map(|vid| self.remove(&vid).map(|entry| (vid, entry)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
