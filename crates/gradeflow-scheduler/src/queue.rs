//! GradingQueue — priority queue with per-submitter dedup and fairness.
//!
//! A binary heap ordered by the entry priority key, plus a live map
//! from submitter to the sequence number of their current entry.
//! Replacement uses lazy deletion: pushing a newer version for a
//! submitter supersedes the old heap slot, which is skipped when it
//! eventually surfaces at the top.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use gradeflow_core::QueueEntry;
use tracing::debug;

struct HeapSlot {
    entry: QueueEntry,
    /// Insertion sequence; identifies this slot in the live map.
    seq: u64,
}

impl PartialEq for HeapSlot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapSlot {}

impl PartialOrd for HeapSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry.cmp(&other.entry).then(self.seq.cmp(&other.seq))
    }
}

struct LiveRef {
    seq: u64,
    version: u64,
}

/// At most one live entry per submitter; lowest priority key pops first.
#[derive(Default)]
pub struct GradingQueue {
    heap: BinaryHeap<Reverse<HeapSlot>>,
    live: HashMap<String, LiveRef>,
    next_seq: u64,
}

impl GradingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an entry, deduplicating per submitter.
    ///
    /// A version at or below the submitter's current live entry is a
    /// no-op (the original keeps its queue position); a newer version
    /// replaces the live entry. Returns whether the queue changed.
    pub fn push(&mut self, entry: QueueEntry) -> bool {
        if let Some(live) = self.live.get(&entry.submitter) {
            if entry.version <= live.version {
                return false;
            }
            debug!(
                submitter = %entry.submitter,
                old_version = live.version,
                new_version = entry.version,
                "queued entry superseded"
            );
        } else {
            debug!(submitter = %entry.submitter, version = entry.version, "entry queued");
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(
            entry.submitter.clone(),
            LiveRef {
                seq,
                version: entry.version,
            },
        );
        self.heap.push(Reverse(HeapSlot { entry, seq }));
        true
    }

    /// Remove and return the highest-priority live entry, skipping
    /// superseded heap slots.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        while let Some(Reverse(slot)) = self.heap.pop() {
            let is_live = self
                .live
                .get(&slot.entry.submitter)
                .is_some_and(|live| live.seq == slot.seq);
            if is_live {
                self.live.remove(&slot.entry.submitter);
                return Some(slot.entry);
            }
        }
        None
    }

    /// Number of live entries (superseded slots do not count).
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn contains(&self, submitter: &str) -> bool {
        self.live.contains_key(submitter)
    }

    /// Live entries in priority order, without disturbing the queue.
    /// Dashboard rendering only; allocates per call.
    pub fn sorted(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self
            .heap
            .iter()
            .filter(|Reverse(slot)| {
                self.live
                    .get(&slot.entry.submitter)
                    .is_some_and(|live| live.seq == slot.seq)
            })
            .map(|Reverse(slot)| slot.entry.clone())
            .collect();
        entries.sort();
        entries
    }
}
